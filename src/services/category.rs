// src/services/category.rs

//! Category membership lookup.
//!
//! Chapter pages on Vicifons are filed under `Categoria:Capita ex operibus`
//! and its subcategories. When an index page links nothing usable, the
//! chapters of a work are the members of that tree titled as its subpages.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::CrawlerConfig;
use crate::services::HttpSource;
use crate::utils::{canonical_title, get_domain, http, parse_numeral};

/// Entries requested per API call; the MediaWiki maximum for anonymous users.
const PAGE_LIMIT: &str = "500";

/// One entry of a category listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMember {
    pub title: String,
    pub is_category: bool,
}

impl CategoryMember {
    pub fn page(title: impl AsRef<str>) -> Self {
        Self {
            title: canonical_title(title.as_ref()),
            is_category: false,
        }
    }

    pub fn subcategory(title: impl AsRef<str>) -> Self {
        Self {
            title: canonical_title(title.as_ref()),
            is_category: true,
        }
    }
}

/// Lists the direct members of a category.
#[async_trait]
pub trait CategorySource: Send + Sync {
    /// Host requests are sent to, used for per-host rate limiting.
    fn host(&self) -> &str;

    async fn members(&self, category: &str) -> std::result::Result<Vec<CategoryMember>, FetchError>;
}

/// Subpages of `work_id` among `members`, in chapter order.
///
/// Titles ending in a numeral sort by its value, so `Liber X` follows
/// `Liber IX` rather than `Liber I`.
pub fn chapters_of(work_id: &str, members: &[CategoryMember]) -> Vec<String> {
    let prefix = format!("{}/", canonical_title(work_id).to_lowercase());

    let mut chapters: Vec<String> = members
        .iter()
        .filter(|m| !m.is_category && m.title.to_lowercase().starts_with(&prefix))
        .map(|m| m.title.clone())
        .collect();
    chapters.sort_by_cached_key(|title| chapter_sort_key(title));
    chapters.dedup();
    chapters
}

fn chapter_sort_key(title: &str) -> (String, Option<usize>, String) {
    match title.rsplit_once(' ') {
        Some((stem, last)) => match parse_numeral(last) {
            Some(n) => (stem.to_lowercase(), Some(n), title.to_string()),
            None => (title.to_lowercase(), None, title.to_string()),
        },
        None => (title.to_lowercase(), None, title.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    query: Option<MembersQuery>,
    #[serde(rename = "continue", default)]
    continuation: Option<Continuation>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct MembersQuery {
    #[serde(default)]
    categorymembers: Vec<RawMember>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    title: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Continuation {
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

/// One page of a listing plus the continuation token, if any.
fn parse_members(
    category: &str,
    body: &str,
) -> std::result::Result<(Vec<CategoryMember>, Option<String>), FetchError> {
    let response: MembersResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::permanent(category, format!("bad API response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(FetchError::permanent(
            category,
            format!("API error {}: {}", error.code, error.info),
        ));
    }

    let members = response
        .query
        .map(|q| q.categorymembers)
        .unwrap_or_default()
        .into_iter()
        .map(|raw| CategoryMember {
            title: canonical_title(&raw.title),
            is_category: raw.kind == "subcat",
        })
        .collect();
    let next = response.continuation.and_then(|c| c.cmcontinue);
    Ok((members, next))
}

/// `list=categorymembers` over the MediaWiki API.
pub struct HttpCategorySource {
    client: Client,
    api_endpoint: Url,
    host: String,
}

impl HttpCategorySource {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = http::create_async_client(config)?;
        let api_endpoint = Url::parse(&config.api_endpoint)?;
        let host = get_domain(&config.api_endpoint).unwrap_or_else(|| config.api_endpoint.clone());
        Ok(Self {
            client,
            api_endpoint,
            host,
        })
    }

    fn listing_url(&self, category: &str, cont: Option<&str>) -> Url {
        let mut url = self.api_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("action", "query")
                .append_pair("list", "categorymembers")
                .append_pair("cmtitle", category)
                .append_pair("cmprop", "title|type")
                .append_pair("cmtype", "page|subcat")
                .append_pair("cmlimit", PAGE_LIMIT)
                .append_pair("format", "json")
                .append_pair("formatversion", "2");
            if let Some(cont) = cont {
                query.append_pair("cmcontinue", cont);
            }
        }
        url
    }
}

#[async_trait]
impl CategorySource for HttpCategorySource {
    fn host(&self) -> &str {
        &self.host
    }

    async fn members(&self, category: &str) -> std::result::Result<Vec<CategoryMember>, FetchError> {
        let mut members = Vec::new();
        let mut cont: Option<String> = None;

        loop {
            let url = self.listing_url(category, cont.as_deref());
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| HttpSource::classify_error(category, &e))?;
            if let Some(error) = HttpSource::classify_status(category, response.status()) {
                return Err(error);
            }
            let body = response
                .text()
                .await
                .map_err(|e| HttpSource::classify_error(category, &e))?;

            let (page, next) = parse_members(category, &body)?;
            members.extend(page);
            match next {
                Some(token) => cont = Some(token),
                None => break,
            }
        }

        log::debug!("{} lists {} members", category, members.len());
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapters_of_filters_and_orders() {
        let members = vec![
            CategoryMember::page("Aeneis/Liber X"),
            CategoryMember::page("Aeneis/Liber II"),
            CategoryMember::page("Georgica/Liber I"),
            CategoryMember::subcategory("Categoria:Aeneis"),
            CategoryMember::page("Aeneis/Liber IX"),
            CategoryMember::page("Aeneis/Liber I"),
            CategoryMember::page("Aeneis"),
            CategoryMember::page("Aeneis/Liber II"),
        ];
        assert_eq!(
            chapters_of("Aeneis", &members),
            vec![
                "Aeneis/Liber I",
                "Aeneis/Liber II",
                "Aeneis/Liber IX",
                "Aeneis/Liber X"
            ]
        );
        assert!(chapters_of("Bucolica", &members).is_empty());
    }

    #[test]
    fn test_parse_members_with_continuation() {
        let body = r#"{
            "batchcomplete": false,
            "continue": {"cmcontinue": "page|4c49424552|123", "continue": "-||"},
            "query": {"categorymembers": [
                {"ns": 0, "title": "Noctes_Atticae/Liber I", "type": "page"},
                {"ns": 14, "title": "Categoria:Gellius", "type": "subcat"}
            ]}
        }"#;
        let (members, next) = parse_members("Categoria:Capita ex operibus", body).unwrap();
        assert_eq!(
            members,
            vec![
                CategoryMember::page("Noctes Atticae/Liber I"),
                CategoryMember::subcategory("Categoria:Gellius"),
            ]
        );
        assert_eq!(next.as_deref(), Some("page|4c49424552|123"));

        let (_, next) = parse_members("X", r#"{"query": {"categorymembers": []}}"#).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_api_error_is_permanent() {
        let body = r#"{"error": {"code": "invalidcategory", "info": "The category name you entered is not valid."}}"#;
        let err = parse_members("Categoria:", body).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("invalidcategory"));
    }

    #[test]
    fn test_listing_url() {
        let source = HttpCategorySource::new(&CrawlerConfig::default()).unwrap();
        assert_eq!(source.host(), "la.wikisource.org");
        let url = source.listing_url("Categoria:Capita ex operibus", Some("abc"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("cmtitle".into(), "Categoria:Capita ex operibus".into())));
        assert!(pairs.contains(&("cmcontinue".into(), "abc".into())));
        assert!(pairs.contains(&("list".into(), "categorymembers".into())));
    }
}
