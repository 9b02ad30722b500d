//! list_projects_sessions tool
//!
//! Aggregates memory counts by the project/session fields inside the
//! metadata JSON, with optional sample contents.

use serde::Deserialize;
use serde_json::Value;

use durandal_core::{GroupCount, GroupKind, MemoryError, Result};

use super::{parse_args, snippet};
use crate::server::McpServer;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "type": {
                "type": "string",
                "enum": ["projects", "sessions", "both"],
                "description": "Which aggregation to return (default both)",
                "default": "both"
            },
            "include_samples": {
                "type": "boolean",
                "description": "Include the newest memory content per group",
                "default": false
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListArgs {
    #[serde(rename = "type")]
    kind: Option<String>,
    include_samples: Option<bool>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: ListArgs = parse_args(args)?;
    let kind = args.kind.as_deref().unwrap_or("both");
    let include_samples = args.include_samples.unwrap_or(false);

    let (want_projects, want_sessions) = match kind {
        "projects" => (true, false),
        "sessions" => (false, true),
        "both" => (true, true),
        other => {
            return Err(MemoryError::validation(
                "type",
                other,
                "must be one of projects, sessions, both",
            ))
        }
    };

    let mut lines = Vec::new();
    if want_projects {
        let groups = server.store.list_groups(GroupKind::Project, include_samples)?;
        lines.push(format!("Projects ({}):", groups.len()));
        render_groups(&mut lines, &groups, include_samples);
    }
    if want_sessions {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        let groups = server.store.list_groups(GroupKind::Session, include_samples)?;
        lines.push(format!("Sessions ({}):", groups.len()));
        render_groups(&mut lines, &groups, include_samples);
    }
    Ok(lines.join("\n"))
}

fn render_groups(lines: &mut Vec<String>, groups: &[GroupCount], include_samples: bool) {
    for group in groups {
        let latest = group
            .latest
            .map(|at| at.format(" (latest %Y-%m-%d)").to_string())
            .unwrap_or_default();
        lines.push(format!(
            "- {}: {} memories{}",
            group.name, group.count, latest
        ));
        if include_samples
            && let Some(sample) = &group.sample
        {
            lines.push(format!("    \"{}\"", snippet(sample, 80)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::store_memory;
    use crate::tools::test_support::test_server;

    async fn seed(server: &McpServer) {
        for (content, project, session) in [
            ("one", "A", "s1"),
            ("two", "A", "s2"),
            ("three", "B", "s1"),
        ] {
            store_memory::execute(
                server,
                Some(serde_json::json!({
                    "content": content,
                    "metadata": {"project": project, "session": session}
                })),
            )
            .await
            .unwrap();
        }
        for _ in 0..50 {
            if server.store.count_memories().unwrap() == 3 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_lists_both_by_default() {
        let (_dir, server) = test_server();
        seed(&server).await;

        let text = execute(&server, None).await.unwrap();
        assert!(text.contains("Projects (2):"));
        assert!(text.contains("- A: 2 memories"));
        assert!(text.contains("- B: 1 memories"));
        assert!(text.contains("Sessions (2):"));
        assert!(text.contains("- s1: 2 memories"));
    }

    #[tokio::test]
    async fn test_projects_only_with_samples() {
        let (_dir, server) = test_server();
        seed(&server).await;

        let text = execute(
            &server,
            Some(serde_json::json!({"type": "projects", "include_samples": true})),
        )
        .await
        .unwrap();
        assert!(text.contains("Projects (2):"));
        assert!(!text.contains("Sessions"));
        assert!(text.contains("\"two\"") || text.contains("\"one\""));
    }

    #[tokio::test]
    async fn test_invalid_type_rejected() {
        let (_dir, server) = test_server();
        let err = execute(&server, Some(serde_json::json!({"type": "everything"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("type"));
    }
}
