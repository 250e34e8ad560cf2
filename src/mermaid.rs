use std::collections::{HashMap, HashSet};

use strum::IntoEnumIterator;

use crate::lineage::{LineageEdge, LineageNode, LineageNodeKind, QueryLineage, RelationshipKind};

struct NodeStyle {
    class: &'static str,
    fill: &'static str,
    stroke: &'static str,
    color: &'static str,
}

struct EdgeStyle {
    stroke: &'static str,
    width: &'static str,
    color: &'static str,
}

/// Open and close brackets of the Mermaid shape used for each kind.
fn shape(kind: LineageNodeKind) -> (&'static str, &'static str) {
    match kind {
        LineageNodeKind::Main => ("([", "])"),
        LineageNodeKind::BaseTable => ("[(", ")]"),
        LineageNodeKind::Cte => ("(", ")"),
        LineageNodeKind::Subquery => ("[[", "]]"),
        LineageNodeKind::ScalarSubquery => ("{{", "}}"),
        LineageNodeKind::TableFunction => ("[/", "/]"),
    }
}

fn node_style(kind: LineageNodeKind) -> NodeStyle {
    let (class, fill, stroke, color) = match kind {
        LineageNodeKind::Main => ("main", "#e3f2fd", "#1565c0", "#0d47a1"),
        LineageNodeKind::BaseTable => ("baseTable", "#e8f5e9", "#2e7d32", "#1b5e20"),
        LineageNodeKind::Cte => ("cte", "#f3e5f5", "#7b1fa2", "#4a148c"),
        LineageNodeKind::Subquery => ("subquery", "#fff3e0", "#e65100", "#bf360c"),
        LineageNodeKind::ScalarSubquery => ("scalarSubquery", "#fffde7", "#f9a825", "#f57f17"),
        LineageNodeKind::TableFunction => ("tableFunction", "#e0f7fa", "#00838f", "#006064"),
    };
    NodeStyle {
        class,
        fill,
        stroke,
        color,
    }
}

fn edge_style(kind: RelationshipKind) -> EdgeStyle {
    let (stroke, width, color) = match kind {
        RelationshipKind::FromTable => ("#2e7d32", "2.5px", "#1b5e20"),
        RelationshipKind::FromSubquery => ("#e65100", "2px", "#bf360c"),
        RelationshipKind::ScalarSubquery => ("#f9a825", "2px", "#f57f17"),
        RelationshipKind::FromTableFunction => ("#00838f", "2px", "#006064"),
        RelationshipKind::Cte => ("#7b1fa2", "2px", "#4a148c"),
        RelationshipKind::Join => ("#5c6bc0", "2px", "#3949ab"),
    };
    EdgeStyle {
        stroke,
        width,
        color,
    }
}

/// Mermaid node ids may only contain ASCII alphanumerics and underscores.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Makes a label safe to place inside `"..."` of a node or `|...|` of an edge.
pub fn escape_label(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "#quot;")
        .replace(['[', ']', '\n'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn edge_label(edge: &LineageEdge) -> String {
    match (edge.relationship_kind, edge.join_type.as_deref()) {
        (RelationshipKind::Join, Some(join_type)) if !join_type.is_empty() => {
            join_type.replace('_', " ").to_lowercase()
        }
        (RelationshipKind::FromTable, _) => "reads".to_owned(),
        (RelationshipKind::FromSubquery, _) => "from subquery".to_owned(),
        (RelationshipKind::ScalarSubquery, _) => "scalar".to_owned(),
        (RelationshipKind::FromTableFunction, _) => "table function".to_owned(),
        (RelationshipKind::Cte, _) => "CTE".to_owned(),
        (RelationshipKind::Join, _) => "join".to_owned(),
    }
}

fn format_node(node: &LineageNode, sanitized_id: &str) -> String {
    let (open, close) = shape(node.kind);
    format!(
        "  {}{}\"{}\"{}",
        sanitized_id,
        open,
        escape_label(&node.label),
        close
    )
}

fn format_edge(from_id: &str, to_id: &str, edge: &LineageEdge) -> String {
    format!(
        "  {} -->|{}| {}",
        from_id,
        escape_label(&edge_label(edge)),
        to_id
    )
}

/// Renders one statement's lineage as a top-down Mermaid flowchart, with a
/// distinct shape and color per node kind and a styled link per edge.
pub fn lineage_to_mermaid(lineage: &QueryLineage) -> String {
    let id_map: HashMap<&str, String> = lineage
        .nodes
        .iter()
        .map(|node| (node.id.as_str(), sanitize_id(&node.id)))
        .collect();

    let mut lines = vec![
        "flowchart TD".to_owned(),
        "  %% Node styles by kind".to_owned(),
    ];

    for node in &lineage.nodes {
        lines.push(format_node(node, &id_map[node.id.as_str()]));
    }

    let kinds_used: HashSet<LineageNodeKind> = lineage.nodes.iter().map(|node| node.kind).collect();
    for kind in LineageNodeKind::iter().filter(|kind| kinds_used.contains(kind)) {
        let style = node_style(kind);
        lines.push(format!(
            "  classDef {} fill:{},stroke:{},color:{},stroke-width:2px",
            style.class, style.fill, style.stroke, style.color
        ));
    }

    for node in &lineage.nodes {
        lines.push(format!(
            "  class {} {}",
            id_map[node.id.as_str()],
            node_style(node.kind).class
        ));
    }

    let mut styled_edges = vec![];
    lines.push(String::new());
    for edge in &lineage.edges {
        match (
            id_map.get(edge.from_id.as_str()),
            id_map.get(edge.to_id.as_str()),
        ) {
            (Some(from_id), Some(to_id)) => {
                lines.push(format_edge(from_id, to_id, edge));
                styled_edges.push(edge);
            }
            _ => log::debug!(
                "Dropping edge {} -> {} with a missing endpoint",
                edge.from_id,
                edge.to_id
            ),
        }
    }

    if !styled_edges.is_empty() {
        lines.push("  %% Edge styles by relationship".to_owned());
        for (idx, edge) in styled_edges.iter().enumerate() {
            let style = edge_style(edge.relationship_kind);
            lines.push(format!(
                "  linkStyle {} stroke:{},stroke-width:{},color:{}",
                idx, style.stroke, style.width, style.color
            ));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, label: &str, kind: LineageNodeKind) -> LineageNode {
        LineageNode {
            id: id.to_owned(),
            label: label.to_owned(),
            kind,
            alias: None,
            query_location: None,
            select_list: None,
        }
    }

    fn edge(from_id: &str, to_id: &str, relationship_kind: RelationshipKind) -> LineageEdge {
        LineageEdge {
            from_id: from_id.to_owned(),
            to_id: to_id.to_owned(),
            relationship_kind,
            setop_type: None,
            setop_side: None,
            join_type: None,
            ref_type: None,
            columns: None,
            left_alias: None,
            right_alias: None,
            condition_class: None,
            condition_type: None,
        }
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label("SQ FROM \"t\""), "SQ FROM #quot;t#quot;");
        assert_eq!(escape_label("  a[0]\n\tb  "), "a 0 b");
        assert_eq!(escape_label("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("base:my-db.t"), "base_my_db_t");
        assert_eq!(sanitize_id("subquery_0"), "subquery_0");
    }

    #[test]
    fn test_join_edge_label() {
        let mut join = edge("base:b", "main", RelationshipKind::Join);
        assert_eq!(edge_label(&join), "join");
        join.join_type = Some("LEFT_OUTER".to_owned());
        assert_eq!(edge_label(&join), "left outer");
    }

    #[test]
    fn test_every_edge_is_labeled() {
        for kind in RelationshipKind::iter() {
            let rendered = format_edge("a", "b", &edge("a", "b", kind));
            assert!(rendered.starts_with("  a -->|"), "{}", rendered);
            assert!(!rendered.contains("||"), "{} has an empty label", kind);
        }
    }

    #[test]
    fn test_minimal_lineage() {
        let lineage = QueryLineage {
            nodes: vec![
                node("main", "main", LineageNodeKind::Main),
                node("base:users", "users", LineageNodeKind::BaseTable),
            ],
            edges: vec![edge("base:users", "main", RelationshipKind::FromTable)],
        };
        let expected = [
            "flowchart TD",
            "  %% Node styles by kind",
            "  main([\"main\"])",
            "  base_users[(\"users\")]",
            "  classDef main fill:#e3f2fd,stroke:#1565c0,color:#0d47a1,stroke-width:2px",
            "  classDef baseTable fill:#e8f5e9,stroke:#2e7d32,color:#1b5e20,stroke-width:2px",
            "  class main main",
            "  class base_users baseTable",
            "",
            "  base_users -->|reads| main",
            "  %% Edge styles by relationship",
            "  linkStyle 0 stroke:#2e7d32,stroke-width:2.5px,color:#1b5e20",
        ]
        .join("\n");
        assert_eq!(lineage_to_mermaid(&lineage), expected);
    }

    #[test]
    fn test_only_main_node() {
        let lineage = QueryLineage {
            nodes: vec![node("main", "main", LineageNodeKind::Main)],
            edges: vec![],
        };
        let out = lineage_to_mermaid(&lineage);
        assert!(out.starts_with("flowchart TD"));
        assert!(!out.contains("-->"));
        assert!(!out.contains("linkStyle"));
        assert!(!out.contains("classDef cte"));
    }

    #[test]
    fn test_drops_edges_with_missing_endpoints() {
        let lineage = QueryLineage {
            nodes: vec![
                node("main", "main", LineageNodeKind::Main),
                node("subquery_0", "SQ FROM ()", LineageNodeKind::Subquery),
            ],
            edges: vec![
                edge("base:ghost", "main", RelationshipKind::FromTable),
                edge("subquery_0", "main", RelationshipKind::FromSubquery),
            ],
        };
        let out = lineage_to_mermaid(&lineage);
        assert!(!out.contains("ghost"));
        assert!(out.contains("  subquery_0[[\"SQ FROM ()\"]]"));
        assert!(out.contains("  subquery_0 -->|from subquery| main"));
        assert!(out.contains("  linkStyle 0 stroke:#e65100,stroke-width:2px,color:#bf360c"));
        assert!(!out.contains("linkStyle 1"));
    }
}
