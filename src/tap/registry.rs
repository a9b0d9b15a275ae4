//! Service discovery through the relational registry (RegTAP)
//!
//! The registry is itself a TAP service, so discovery reuses the same
//! connection and query machinery as everything else: filters become an
//! ADQL query against the `rr` schema, and result rows become service
//! descriptors. Registries escape ampersands in access URLs, so those are
//! unescaped before use.

use super::connection::{ConnectOptions, TapConnection};
use super::error::Result;
use super::job::QueryMode;
use log::warn;
use serde::{Deserialize, Serialize};

/// Kind of data-access service a registry entry provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Cone,
    Image,
    Spectral,
    Table,
}

impl ServiceType {
    /// Fragment of the registry capability type identifying this service
    /// kind (from the IVOA standard identifiers)
    pub fn capability_fragment(&self) -> &'static str {
        match self {
            ServiceType::Cone => "conesearch",
            ServiceType::Image => "simpleimageaccess",
            ServiceType::Spectral => "simplespectralaccess",
            ServiceType::Table => "tableaccess",
        }
    }
}

/// One discovered service endpoint. Immutable; the only field the query
/// core requires is `access_url`. `keywords` holds registry-provided
/// subject keywords when the source supplies them; registry query rows do
/// not, so descriptors built from them leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub access_url: String,
    pub short_name: String,
    pub title: String,
    pub publisher: String,
    pub service_type: Option<ServiceType>,
    pub keywords: Vec<String>,
}

/// Registry lookup client
pub struct RegistryClient {
    connection: TapConnection,
}

impl RegistryClient {
    /// Connect to a registry TAP endpoint
    pub fn new(registry_url: &str, options: ConnectOptions) -> Result<Self> {
        let connection = TapConnection::connect(registry_url, options)?;
        Ok(RegistryClient { connection })
    }

    /// Query the registry for services matching the given filters.
    ///
    /// All filters are optional and combine with AND. `keyword` matches
    /// against identifier, title and description; `publisher` against the
    /// publishing role name. Rows without a usable access URL are skipped.
    pub async fn query(
        &self,
        keyword: Option<&str>,
        service_type: Option<ServiceType>,
        publisher: Option<&str>,
    ) -> Result<Vec<ServiceDescriptor>> {
        let adql = build_registry_adql(keyword, service_type, publisher);
        let job = self.connection.submit_query(&adql, QueryMode::Sync).await?;
        let table = job.get_results()?;

        let mut services = Vec::with_capacity(table.row_count());
        for row in 0..table.row_count() {
            let access_url = table
                .get(row, "access_url")?
                .as_str()
                .map(unescape_entities)
                .unwrap_or_default();
            if access_url.is_empty() {
                warn!("registry row {} has no access URL, skipping", row);
                continue;
            }
            services.push(ServiceDescriptor {
                access_url,
                short_name: cell_text(table.get(row, "short_name")?),
                title: cell_text(table.get(row, "res_title")?),
                publisher: cell_text(table.get(row, "role_name")?),
                service_type,
                keywords: Vec::new(),
            });
        }
        Ok(services)
    }
}

fn cell_text(value: &super::table::Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Build the RegTAP query for the given filters
fn build_registry_adql(
    keyword: Option<&str>,
    service_type: Option<ServiceType>,
    publisher: Option<&str>,
) -> String {
    let mut clauses = vec![
        "intf.intf_type = 'vs:paramhttp'".to_string(),
        "role.base_role = 'publisher'".to_string(),
    ];

    if let Some(service_type) = service_type {
        clauses.push(format!(
            "cap.cap_type LIKE '%{}%'",
            service_type.capability_fragment()
        ));
    }
    if let Some(keyword) = keyword {
        let keyword = escape_adql_literal(keyword);
        clauses.push(format!(
            "(res.ivoid LIKE '%{kw}%' OR res.res_title LIKE '%{kw}%' OR res.res_description LIKE '%{kw}%')",
            kw = keyword
        ));
    }
    if let Some(publisher) = publisher {
        clauses.push(format!(
            "role.role_name LIKE '%{}%'",
            escape_adql_literal(publisher)
        ));
    }

    format!(
        "SELECT res.short_name, res.res_title, intf.access_url, role.role_name \
         FROM rr.resource AS res \
         JOIN rr.capability AS cap ON res.ivoid = cap.ivoid \
         JOIN rr.interface AS intf ON cap.ivoid = intf.ivoid AND cap.cap_index = intf.cap_index \
         JOIN rr.res_role AS role ON res.ivoid = role.ivoid \
         WHERE {}",
        clauses.join(" AND ")
    )
}

/// Double single quotes for safe embedding in an ADQL string literal
fn escape_adql_literal(text: &str) -> String {
    text.replace('\'', "''")
}

/// Undo HTML entity escaping in registry-provided URLs. Registries emit
/// `&amp;` inside query strings; the handful of named entities below is
/// what shows up in practice.
fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adql_includes_all_filters() {
        let adql = build_registry_adql(Some("heasarc"), Some(ServiceType::Table), Some("NASA"));
        assert!(adql.contains("cap.cap_type LIKE '%tableaccess%'"));
        assert!(adql.contains("res.ivoid LIKE '%heasarc%'"));
        assert!(adql.contains("role.role_name LIKE '%NASA%'"));
        assert!(adql.contains("role.base_role = 'publisher'"));
    }

    #[test]
    fn test_adql_without_filters_keeps_base_clauses() {
        let adql = build_registry_adql(None, None, None);
        assert!(adql.contains("WHERE intf.intf_type = 'vs:paramhttp'"));
        assert!(!adql.contains("cap_type LIKE"));
    }

    #[test]
    fn test_adql_literal_escaping() {
        let adql = build_registry_adql(Some("o'brien"), None, None);
        assert!(adql.contains("o''brien"));
    }

    #[test]
    fn test_unescape_access_url() {
        assert_eq!(
            unescape_entities("http://example.org/tap?a=1&amp;b=2"),
            "http://example.org/tap?a=1&b=2"
        );
    }

    #[test]
    fn test_service_descriptor_from_json() {
        let descriptor: ServiceDescriptor = serde_json::from_str(
            r#"{
                "access_url": "http://example.org/tap",
                "short_name": "EXAMPLE",
                "title": "Example archive",
                "publisher": "Example Observatory",
                "service_type": "table",
                "keywords": ["obscore"]
            }"#,
        )
        .unwrap();
        assert_eq!(descriptor.access_url, "http://example.org/tap");
        assert_eq!(descriptor.service_type, Some(ServiceType::Table));
    }
}
