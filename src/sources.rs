use anyhow::Result;

use crate::config::Config;

/// One row of `ksync sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: &'static str,
    pub source_type: &'static str,
    pub target: Option<String>,
}

pub fn configured_sources(config: &Config) -> Vec<SourceInfo> {
    vec![
        SourceInfo {
            name: "jira",
            source_type: "issue",
            target: config
                .sources
                .jira
                .as_ref()
                .map(|j| format!("{} project {}", j.base_url, j.project_key)),
        },
        SourceInfo {
            name: "confluence",
            source_type: "page",
            target: config
                .sources
                .confluence
                .as_ref()
                .map(|c| format!("{} space {}", c.base_url, c.space_key)),
        },
    ]
}

pub fn list_sources(config: &Config) -> Result<()> {
    let token_set = std::env::var("ATLASSIAN_API_TOKEN").is_ok();

    println!("{:<12} {:<6} {:<16} TARGET", "SOURCE", "TYPE", "STATUS");
    for source in configured_sources(config) {
        let (status, target) = match &source.target {
            Some(target) if token_set => ("OK", target.as_str()),
            Some(target) => ("NO TOKEN", target.as_str()),
            None => ("NOT CONFIGURED", "-"),
        };
        println!(
            "{:<12} {:<6} {:<16} {}",
            source.name, source.source_type, status, target
        );
    }

    let key_status = if std::env::var("DIFY_API_KEY").is_ok() {
        "OK"
    } else {
        "NO API KEY"
    };
    println!(
        "{:<12} {:<6} {:<16} {} dataset {}",
        "dify", "dest", key_status, config.destination.api_url, config.destination.dataset_id
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_sources_have_no_target() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "/tmp/x.sqlite"

[sources.confluence]
base_url = "https://acme.atlassian.net"
email = "bot@acme.com"
space_key = "TEAM"

[destination]
api_url = "http://localhost/v1"
dataset_id = "ds"
"#,
        )
        .unwrap();
        let sources = configured_sources(&config);
        assert_eq!(sources[0].name, "jira");
        assert!(sources[0].target.is_none());
        assert_eq!(
            sources[1].target.as_deref(),
            Some("https://acme.atlassian.net space TEAM")
        );
    }
}
