use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::{
    versioning::escape_like,
    web::{
        AppState,
        extract::{flexible_i64, non_empty},
        models::{TEMPLATE_SUMMARY_COLUMNS, TemplateSummaryRow},
        responses::{ApiResult, bad_request, internal_error},
    },
};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Default, Deserialize)]
pub struct CommunityQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default, rename = "subjectCode")]
    subject_code: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    year: Option<i64>,
    #[serde(default, deserialize_with = "flexible_i64")]
    semester: Option<i64>,
    #[serde(default)]
    order: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    limit: Option<i64>,
    #[serde(default, deserialize_with = "flexible_i64")]
    offset: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunityOrder {
    Recent,
    Oldest,
    Name,
}

impl CommunityOrder {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("recent") => Some(Self::Recent),
            Some("oldest") => Some(Self::Oldest),
            Some("name") => Some(Self::Name),
            _ => None,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::Recent => "t.created_at DESC, t.id DESC",
            Self::Oldest => "t.created_at ASC, t.id ASC",
            Self::Name => "LOWER(t.name) ASC, t.version DESC, t.id ASC",
        }
    }
}

/// Normalised filters for the community listing.
#[derive(Debug, PartialEq, Eq)]
pub struct CommunityFilter {
    pub pattern: Option<String>,
    pub subject_code: Option<String>,
    pub year: Option<i32>,
    pub semester: Option<i32>,
    pub order: CommunityOrder,
    pub limit: i64,
    pub offset: i64,
}

impl CommunityFilter {
    pub fn from_query(query: CommunityQuery) -> Result<Self, String> {
        let order = CommunityOrder::parse(query.order.as_deref())
            .ok_or_else(|| "order must be one of recent, oldest, name".to_string())?;

        Ok(Self {
            pattern: non_empty(query.q).map(|q| format!("%{}%", escape_like(&q))),
            subject_code: non_empty(query.subject_code).map(|code| code.to_ascii_uppercase()),
            year: narrow("year", query.year)?,
            semester: narrow("semester", query.semester)?,
            order,
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: query.offset.unwrap_or(0).max(0),
        })
    }
}

fn narrow(field: &str, value: Option<i64>) -> Result<Option<i32>, String> {
    value
        .map(|value| i32::try_from(value).map_err(|_| format!("{field} is out of range")))
        .transpose()
}

const COMMUNITY_FROM: &str = "FROM templates t
     JOIN users u ON u.id = t.owner_id
     LEFT JOIN subjects s ON s.id = t.subject_id
     WHERE t.is_publishable AND t.is_template
       AND ($1::TEXT IS NULL
            OR t.name ILIKE $1 ESCAPE '\\'
            OR t.description ILIKE $1 ESCAPE '\\'
            OR s.subject_code ILIKE $1 ESCAPE '\\'
            OR u.username ILIKE $1 ESCAPE '\\'
            OR u.first_name ILIKE $1 ESCAPE '\\'
            OR u.last_name ILIKE $1 ESCAPE '\\')
       AND ($2::TEXT IS NULL OR s.subject_code = $2)
       AND ($3::INTEGER IS NULL OR s.year = $3)
       AND ($4::INTEGER IS NULL OR s.semester = $4)";

#[derive(Serialize)]
pub struct CommunityPage {
    count: i64,
    limit: i64,
    offset: i64,
    results: Vec<TemplateSummaryRow>,
}

/// Publishable templates from every user, searchable and paginated.
pub async fn community_templates(
    State(state): State<AppState>,
    Query(query): Query<CommunityQuery>,
) -> ApiResult<Json<CommunityPage>> {
    let filter = CommunityFilter::from_query(query).map_err(bad_request)?;
    let pool = state.pool_ref();

    let count_sql = format!("SELECT COUNT(*) {COMMUNITY_FROM}");
    let page_sql = format!(
        "SELECT {TEMPLATE_SUMMARY_COLUMNS} {COMMUNITY_FROM}
         ORDER BY {}
         LIMIT $5 OFFSET $6",
        filter.order.order_by()
    );

    let count_query = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind(filter.pattern.as_deref())
        .bind(filter.subject_code.as_deref())
        .bind(filter.year)
        .bind(filter.semester)
        .fetch_one(pool);

    let page_query = sqlx::query_as::<_, TemplateSummaryRow>(&page_sql)
        .bind(filter.pattern.as_deref())
        .bind(filter.subject_code.as_deref())
        .bind(filter.year)
        .bind(filter.semester)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(pool);

    let (count, results) =
        tokio::try_join!(count_query, page_query).map_err(internal_error)?;

    Ok(Json(CommunityPage {
        count,
        limit: filter.limit,
        offset: filter.offset,
        results,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use serde_json::json;
    use sqlx::PgPool;

    use super::*;
    use crate::web::test_support::{app_with_pool, get, post_json, send, test_app};

    fn query(limit: Option<i64>, offset: Option<i64>) -> CommunityQuery {
        CommunityQuery {
            limit,
            offset,
            ..CommunityQuery::default()
        }
    }

    #[test]
    fn limit_and_offset_are_clamped() {
        let filter = CommunityFilter::from_query(query(None, None)).unwrap();
        assert_eq!((filter.limit, filter.offset), (DEFAULT_LIMIT, 0));

        let filter = CommunityFilter::from_query(query(Some(0), Some(-5))).unwrap();
        assert_eq!((filter.limit, filter.offset), (1, 0));

        let filter = CommunityFilter::from_query(query(Some(500), Some(40))).unwrap();
        assert_eq!((filter.limit, filter.offset), (MAX_LIMIT, 40));
    }

    #[test]
    fn search_text_is_wrapped_and_escaped() {
        let filter = CommunityFilter::from_query(CommunityQuery {
            q: Some("  100%_done ".to_string()),
            subject_code: Some("finm7403".to_string()),
            ..CommunityQuery::default()
        })
        .unwrap();
        assert_eq!(filter.pattern.as_deref(), Some("%100\\%\\_done%"));
        assert_eq!(filter.subject_code.as_deref(), Some("FINM7403"));

        let filter = CommunityFilter::from_query(CommunityQuery {
            q: Some("   ".to_string()),
            ..CommunityQuery::default()
        })
        .unwrap();
        assert_eq!(filter.pattern, None);
    }

    #[test]
    fn order_defaults_to_recent_and_rejects_unknown_values() {
        assert_eq!(CommunityOrder::parse(None), Some(CommunityOrder::Recent));
        assert_eq!(CommunityOrder::parse(Some("Oldest")), Some(CommunityOrder::Oldest));
        assert_eq!(CommunityOrder::parse(Some("name")), Some(CommunityOrder::Name));
        assert_eq!(CommunityOrder::parse(Some("popular")), None);
    }

    #[test]
    fn out_of_range_years_are_rejected() {
        let error = CommunityFilter::from_query(CommunityQuery {
            year: Some(i64::from(i32::MAX) + 1),
            ..CommunityQuery::default()
        })
        .unwrap_err();
        assert_eq!(error, "year is out of range");

        let filter = CommunityFilter::from_query(CommunityQuery {
            year: Some(2025),
            semester: Some(2),
            ..CommunityQuery::default()
        })
        .unwrap();
        assert_eq!((filter.year, filter.semester), (Some(2025), Some(2)));
    }

    #[tokio::test]
    async fn unknown_order_is_rejected_before_querying() {
        let (status, body) = send(test_app(), get("/templates/community/?order=popular")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn malformed_limit_is_rejected() {
        let (status, _) = send(test_app(), get("/templates/community/?limit=many")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn out_of_range_semester_is_a_bad_request() {
        let (status, body) =
            send(test_app(), get("/templates/community/?semester=99999999999")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "semester is out of range");
    }

    async fn publish(pool: &PgPool, username: &str, name: &str, publishable: bool) {
        let (status, _) = send(
            app_with_pool(pool.clone()),
            post_json(
                "/template/update/",
                json!({
                    "username": username,
                    "name": name,
                    "subjectCode": "FINM7403",
                    "year": 2025,
                    "semester": 2,
                    "isPublishable": publishable,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn listing_hides_private_templates_and_searches_owner_names(pool: PgPool) {
        sqlx::query(
            "INSERT INTO users (username, password_hash, first_name, last_name, role) VALUES
                 ('alice', 'x', 'Alice', 'Nguyen', 'COORDINATOR'),
                 ('bob', 'x', 'Bob', 'Smith', 'STAFF')",
        )
        .execute(&pool)
        .await
        .unwrap();
        publish(&pool, "alice", "Essay", true).await;
        publish(&pool, "alice", "Private notes", false).await;
        publish(&pool, "bob", "Lab report", true).await;

        let (status, body) = send(app_with_pool(pool.clone()), get("/templates/community/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        let names: Vec<&str> = body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["name"].as_str().unwrap())
            .collect();
        assert!(!names.contains(&"Private notes"));

        let (_, body) = send(app_with_pool(pool), get("/templates/community/?q=nguyen")).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["name"], "Essay");
        assert_eq!(body["results"][0]["ownerUsername"], "alice");
    }
}
