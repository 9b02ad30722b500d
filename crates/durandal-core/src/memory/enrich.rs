//! Metadata enrichment
//!
//! Pure transform applied at store time. Fills defaults and derived fields;
//! never overwrites anything the caller supplied.

use chrono::{DateTime, Duration, Utc};

use super::{
    generate_memory_id, AccessPatternMeta, KnowledgeGraphMeta, MemoryMetadata, RamrMeta,
    SelectiveAttention,
};

/// Enrich caller-supplied metadata into its stored form.
///
/// `now` is injected so callers (and tests) control the clock.
pub fn enrich_metadata(mut metadata: MemoryMetadata, now: DateTime<Utc>) -> MemoryMetadata {
    if metadata.id.is_none() {
        metadata.id = Some(generate_memory_id(now));
    }
    if metadata.project.is_none() {
        metadata.project = Some("default".to_string());
    }
    if metadata.session.is_none() {
        metadata.session = Some(now.date_naive().to_string());
    }
    if metadata.created_at.is_none() {
        metadata.created_at = Some(now);
    }
    if metadata.updated_at.is_none() {
        metadata.updated_at = Some(now);
    }

    let importance = metadata.importance();

    if metadata.ramr.is_none() {
        let mut priority = 0.6 * importance;
        if !metadata.categories.is_empty() {
            priority += 0.2;
        }
        if !metadata.keywords.is_empty() {
            priority += 0.2;
        }
        metadata.ramr = Some(RamrMeta {
            cache_priority: priority.clamp(0.0, 1.0),
            prefetch_related: !metadata.relationships.is_empty(),
            access_pattern: AccessPatternMeta::default(),
        });
    }

    if metadata.selective_attention.is_none() {
        let review_days = (30.0 * (1.0 + importance)).floor() as i64;
        metadata.selective_attention = Some(SelectiveAttention {
            retention_score: importance,
            review_date: now + Duration::days(review_days),
            archive_candidate: false,
            attention_score: importance,
        });
    }

    if metadata.knowledge_graph.is_none() {
        metadata.knowledge_graph = Some(KnowledgeGraphMeta {
            node_type: infer_node_type(&metadata),
            cluster: infer_cluster(&metadata),
        });
    }

    metadata
}

fn infer_node_type(metadata: &MemoryMetadata) -> String {
    if metadata.categories.iter().any(|c| c == "code") {
        "code_pattern".to_string()
    } else if metadata.categories.iter().any(|c| c == "documentation") {
        "documentation".to_string()
    } else if metadata.kind.as_deref() == Some("conversation") {
        "conversation".to_string()
    } else {
        "general_knowledge".to_string()
    }
}

fn infer_cluster(metadata: &MemoryMetadata) -> String {
    match metadata.categories.first() {
        Some(first) => format!("{}_cluster", first),
        None => "general_cluster".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_defaults() {
        let now = Utc::now();
        let enriched = enrich_metadata(MemoryMetadata::default(), now);

        assert!(enriched.id.as_deref().unwrap().starts_with("mem_"));
        assert_eq!(enriched.project.as_deref(), Some("default"));
        assert_eq!(
            enriched.session.as_deref(),
            Some(now.date_naive().to_string().as_str())
        );
        assert_eq!(enriched.created_at, Some(now));
        assert_eq!(enriched.updated_at, Some(now));
    }

    #[test]
    fn test_never_overwrites_supplied_fields() {
        let now = Utc::now();
        let earlier = now - Duration::days(3);
        let supplied = MemoryMetadata {
            id: Some("mem_custom".to_string()),
            project: Some("p1".to_string()),
            session: Some("s1".to_string()),
            created_at: Some(earlier),
            ..Default::default()
        };
        let enriched = enrich_metadata(supplied, now);
        assert_eq!(enriched.id.as_deref(), Some("mem_custom"));
        assert_eq!(enriched.project.as_deref(), Some("p1"));
        assert_eq!(enriched.session.as_deref(), Some("s1"));
        assert_eq!(enriched.created_at, Some(earlier));
    }

    #[test]
    fn test_cache_priority_formula() {
        let now = Utc::now();

        // importance only
        let meta = MemoryMetadata {
            importance: Some(0.5),
            ..Default::default()
        };
        let ramr = enrich_metadata(meta, now).ramr.unwrap();
        assert!((ramr.cache_priority - 0.3).abs() < 1e-9);

        // importance + categories + keywords
        let meta = MemoryMetadata {
            importance: Some(1.0),
            categories: vec!["code".to_string()],
            keywords: vec!["rust".to_string()],
            ..Default::default()
        };
        let ramr = enrich_metadata(meta, now).ramr.unwrap();
        assert!((ramr.cache_priority - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_review_date_scales_with_importance() {
        let now = Utc::now();

        let low = enrich_metadata(
            MemoryMetadata {
                importance: Some(0.0),
                ..Default::default()
            },
            now,
        );
        let high = enrich_metadata(
            MemoryMetadata {
                importance: Some(1.0),
                ..Default::default()
            },
            now,
        );

        let low_sa = low.selective_attention.unwrap();
        let high_sa = high.selective_attention.unwrap();
        assert_eq!(low_sa.review_date, now + Duration::days(30));
        assert_eq!(high_sa.review_date, now + Duration::days(60));
        assert_eq!(low_sa.retention_score, 0.0);
        assert_eq!(high_sa.retention_score, 1.0);
    }

    #[test]
    fn test_node_type_inference() {
        let now = Utc::now();

        let code = MemoryMetadata {
            categories: vec!["code".to_string()],
            ..Default::default()
        };
        assert_eq!(
            enrich_metadata(code, now).knowledge_graph.unwrap().node_type,
            "code_pattern"
        );

        let docs = MemoryMetadata {
            categories: vec!["documentation".to_string()],
            ..Default::default()
        };
        assert_eq!(
            enrich_metadata(docs, now).knowledge_graph.unwrap().node_type,
            "documentation"
        );

        let convo = MemoryMetadata {
            kind: Some("conversation".to_string()),
            ..Default::default()
        };
        let kg = enrich_metadata(convo, now).knowledge_graph.unwrap();
        assert_eq!(kg.node_type, "conversation");
        assert_eq!(kg.cluster, "general_cluster");

        let plain = enrich_metadata(MemoryMetadata::default(), now);
        assert_eq!(
            plain.knowledge_graph.unwrap().node_type,
            "general_knowledge"
        );
    }

    #[test]
    fn test_cluster_uses_first_category() {
        let now = Utc::now();
        let meta = MemoryMetadata {
            categories: vec!["rust".to_string(), "code".to_string()],
            ..Default::default()
        };
        assert_eq!(
            enrich_metadata(meta, now).knowledge_graph.unwrap().cluster,
            "rust_cluster"
        );
    }
}
