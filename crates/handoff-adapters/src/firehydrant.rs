use async_trait::async_trait;
use handoff_core::{TargetTeam, TargetUser};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::http::{HttpClientConfig, HttpFetcher};
use crate::{AdapterError, TargetPlatform};

pub const DEFAULT_BASE_URL: &str = "https://api.firehydrant.io";
const PER_PAGE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct FhTeam {
    id: String,
    name: String,
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FhUser {
    id: String,
    name: String,
    email: String,
}

/// Read-only FireHydrant client for the entities migration links against.
#[derive(Debug, Clone)]
pub struct FireHydrantTarget {
    http: HttpFetcher,
}

impl FireHydrantTarget {
    pub fn new(
        config: &HttpClientConfig,
        base_url: Option<&str>,
        token: &str,
    ) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(
            config,
            base_url.unwrap_or(DEFAULT_BASE_URL),
            &[
                ("authorization", format!("Bearer {token}")),
                ("accept", "application/json".to_string()),
            ],
        )?;
        Ok(Self { http })
    }

    async fn drain<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AdapterError> {
        let mut out = Vec::new();
        let mut page_number = 1u32;
        loop {
            let query = [
                ("page", page_number.to_string()),
                ("per_page", PER_PAGE.to_string()),
            ];
            let page: Page<T> = self.http.get_json(path, &query).await?;
            debug!(path, page = page_number, fetched = page.data.len(), "firehydrant page");
            out.extend(page.data);
            match page.pagination.next {
                Some(next) if next > page_number => page_number = next,
                _ => return Ok(out),
            }
        }
    }
}

#[async_trait]
impl TargetPlatform for FireHydrantTarget {
    fn platform_id(&self) -> &'static str {
        "firehydrant"
    }

    async fn list_teams(&self) -> Result<Vec<TargetTeam>, AdapterError> {
        let teams = self.drain::<FhTeam>("v1/teams").await?;
        Ok(teams
            .into_iter()
            .map(|t| TargetTeam {
                slug: t.slug.unwrap_or_default(),
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<TargetUser>, AdapterError> {
        let users = self.drain::<FhUser>("v1/users").await?;
        Ok(users
            .into_iter()
            .map(|u| TargetUser {
                id: u.id,
                name: u.name,
                email: u.email,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_has_no_next() {
        let page: Page<FhTeam> = serde_json::from_str(
            r#"{
              "data": [{"id": "F1", "name": "site-reliability", "slug": "site-reliability"}],
              "pagination": {"count": 1, "page": 3, "items": 1, "pages": 3, "last": 3, "prev": 2, "next": null}
            }"#,
        )
        .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.pagination.next, None);
    }

    #[test]
    fn teams_without_slug_still_parse() {
        let page: Page<FhTeam> =
            serde_json::from_str(r#"{"data": [{"id": "F2", "name": "Ops"}]}"#).unwrap();
        assert_eq!(page.data[0].slug, None);
    }
}
