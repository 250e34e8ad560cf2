use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter};

use crate::ast::{
    CteMap, Expression, FromTable, JoinRef, SelectNode, SerializedSql, SetOperationNode,
    Statement, StatementNode, non_blank,
};

pub const MAIN_ID: &str = "main";
const DEFAULT_SETOP_TYPE: &str = "UNION";
const DEFAULT_CTE_NAME: &str = "cte";
const DEFAULT_BASE_TABLE_NAME: &str = "base_table";
const DEFAULT_TABLE_FUNCTION_LABEL: &str = "table_function";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LineageNodeKind {
    Main,
    BaseTable,
    Cte,
    Subquery,
    ScalarSubquery,
    TableFunction,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationshipKind {
    Cte,
    FromTable,
    FromSubquery,
    Join,
    FromTableFunction,
    ScalarSubquery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SetopSide {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LineageNode {
    pub id: String,
    pub label: String,
    pub kind: LineageNodeKind,
    /// Name the source is referred to by in the query (e.g. in JOIN ON column refs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_location: Option<u64>,
    /// Output column labels of the node's own SELECT list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_list: Option<Vec<String>>,
}

/// Edge from a source to the select that reads it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LineageEdge {
    #[serde(rename = "fromId")]
    pub from_id: String,
    #[serde(rename = "toId")]
    pub to_id: String,
    pub relationship_kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setop_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setop_side: Option<SetopSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_type: Option<String>,
    /// USING columns or the column refs of the ON condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<String>,
}

/// Lineage graph of a single statement.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct QueryLineage {
    pub nodes: Vec<LineageNode>,
    pub edges: Vec<LineageEdge>,
}

impl QueryLineage {
    pub fn node(&self, id: &str) -> Option<&LineageNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a LineageEdge> {
        self.edges.iter().filter(move |edge| edge.from_id == id)
    }
}

#[derive(Debug, Clone)]
struct SetopContext {
    setop_type: String,
    setop_side: SetopSide,
}

#[derive(Debug, Clone, Default)]
struct JoinInfo {
    join_type: Option<String>,
    ref_type: Option<String>,
    columns: Option<Vec<String>>,
    left_alias: Option<String>,
    right_alias: Option<String>,
    condition_class: Option<String>,
    condition_type: Option<String>,
}

impl LineageEdge {
    fn new(
        from_id: &str,
        to_id: &str,
        relationship_kind: RelationshipKind,
        setop: Option<&SetopContext>,
        join: Option<&JoinInfo>,
    ) -> Self {
        let join = join.cloned().unwrap_or_default();
        LineageEdge {
            from_id: from_id.to_owned(),
            to_id: to_id.to_owned(),
            relationship_kind,
            setop_type: setop.map(|ctx| ctx.setop_type.clone()),
            setop_side: setop.map(|ctx| ctx.setop_side),
            join_type: join.join_type,
            ref_type: join.ref_type,
            columns: join.columns,
            left_alias: join.left_alias,
            right_alias: join.right_alias,
            condition_class: join.condition_class,
            condition_type: join.condition_type,
        }
    }
}

fn relationship(join: Option<&JoinInfo>, plain: RelationshipKind) -> RelationshipKind {
    if join.is_some() {
        RelationshipKind::Join
    } else {
        plain
    }
}

fn sq_from_label(source: Option<&str>) -> String {
    match source {
        Some(source) if !source.is_empty() => format!("SQ FROM ({})", source),
        _ => "SQ FROM ()".to_owned(),
    }
}

fn condition_columns(condition: Option<&Expression>) -> Option<Vec<String>> {
    let condition = condition?;
    let columns: Vec<String> = [&condition.left, &condition.right]
        .into_iter()
        .filter_map(|side| side.as_deref().and_then(Expression::column_ref))
        .collect();
    if columns.is_empty() {
        None
    } else {
        Some(columns)
    }
}

/// Aliases guessed from qualified column refs of the ON condition (`l.id` -> `l`).
/// A bare column name is never taken as an alias.
fn condition_qualifiers(condition: Option<&Expression>) -> (Option<String>, Option<String>) {
    let qualifier = |side: &Option<Box<Expression>>| {
        side.as_deref()
            .filter(|expr| expr.column_names.len() > 1)
            .map(|expr| expr.column_names[0].clone())
    };
    match condition {
        Some(condition) => (qualifier(&condition.left), qualifier(&condition.right)),
        None => (None, None),
    }
}

/// Per-statement state. Counters live here so ids never leak across statements.
#[derive(Debug, Default)]
struct LineageContext {
    nodes: IndexMap<String, LineageNode>,
    edges: Vec<LineageEdge>,
    subquery_id: usize,
    table_function_id: usize,
}

impl LineageContext {
    fn next_subquery_id(&mut self) -> usize {
        let curr = self.subquery_id;
        self.subquery_id += 1;
        curr
    }

    fn next_table_function_id(&mut self) -> usize {
        let curr = self.table_function_id;
        self.table_function_id += 1;
        curr
    }

    fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    fn node_label(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).map(|node| node.label.as_str())
    }

    fn add_node(&mut self, node: LineageNode) {
        if self.nodes.contains_key(&node.id) {
            log::debug!("Node {} already present, keeping the first one", node.id);
            return;
        }
        self.nodes.insert(node.id.clone(), node);
    }

    fn has_edge(&self, from_id: &str, to_id: &str) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.from_id == from_id && edge.to_id == to_id)
    }

    fn add_edge(&mut self, edge: LineageEdge) {
        self.edges.push(edge);
    }

    fn into_lineage(self) -> QueryLineage {
        QueryLineage {
            nodes: self.nodes.into_values().collect(),
            edges: self.edges,
        }
    }
}

#[derive(Default)]
struct LineageExtractor {
    context: LineageContext,
}

impl LineageExtractor {
    fn statement_lin(mut self, node: &StatementNode) -> QueryLineage {
        self.context.add_node(LineageNode {
            id: MAIN_ID.to_owned(),
            label: MAIN_ID.to_owned(),
            kind: LineageNodeKind::Main,
            alias: None,
            query_location: node.query_location(),
            select_list: node.as_select().map(SelectNode::select_list_labels),
        });
        self.statement_node_lin(node, MAIN_ID, None);
        self.context.into_lineage()
    }

    fn statement_node_lin(
        &mut self,
        node: &StatementNode,
        consumer: &str,
        setop: Option<&SetopContext>,
    ) {
        match node {
            StatementNode::Select(select) => self.select_node_lin(select, consumer, setop),
            StatementNode::SetOperation(set_operation) => {
                self.set_operation_lin(set_operation, consumer)
            }
            StatementNode::Unknown(tag) => {
                log::debug!("Skipping unmodeled statement node {:?}", tag)
            }
        }
    }

    fn set_operation_lin(&mut self, node: &SetOperationNode, consumer: &str) {
        self.cte_map_lin(&node.cte_map, consumer, None);

        let setop_type = node
            .setop_type
            .clone()
            .unwrap_or_else(|| DEFAULT_SETOP_TYPE.to_owned());
        for (side, branch) in [(SetopSide::Left, &node.left), (SetopSide::Right, &node.right)] {
            if let Some(branch) = branch {
                let setop = SetopContext {
                    setop_type: setop_type.clone(),
                    setop_side: side,
                };
                self.statement_node_lin(branch, consumer, Some(&setop));
            }
        }
    }

    fn cte_map_lin(&mut self, cte_map: &CteMap, consumer: &str, setop: Option<&SetopContext>) {
        for entry in &cte_map.map {
            let name = entry.key.as_deref().unwrap_or(DEFAULT_CTE_NAME);
            let Some(query_node) = entry.query_node() else {
                log::debug!("Skipping cte {} without a query", name);
                continue;
            };

            let cte_id = format!("cte:{}", name);
            if !self.context.contains_node(&cte_id) {
                let select = query_node.as_select();
                self.context.add_node(LineageNode {
                    id: cte_id.clone(),
                    label: name.to_owned(),
                    kind: LineageNodeKind::Cte,
                    alias: Some(name.to_owned()),
                    query_location: select.and_then(|select| select.query_location),
                    select_list: select.map(SelectNode::select_list_labels),
                });
            }
            self.context.add_edge(LineageEdge::new(
                &cte_id,
                consumer,
                RelationshipKind::Cte,
                setop,
                None,
            ));
            // cte bodies are not part of the enclosing set operation branch
            self.statement_node_lin(query_node, &cte_id, None);
        }
    }

    fn select_node_lin(&mut self, node: &SelectNode, consumer: &str, setop: Option<&SetopContext>) {
        self.cte_map_lin(&node.cte_map, consumer, setop);

        if let Some(from_table) = &node.from_table {
            self.from_table_lin(from_table, consumer, None, None, setop);
        }

        for item in &node.select_list {
            if let Some(select) = item.subquery_select() {
                let alias = non_blank(item.alias.as_deref());
                self.scalar_subquery_lin(select, alias, item.query_location, consumer, setop);
            }
        }

        for expr in [&node.where_clause, &node.having, &node.qualify]
            .into_iter()
            .flatten()
        {
            self.expr_subqueries_lin(expr, consumer, setop);
        }
        for expr in node.order_expressions() {
            self.expr_subqueries_lin(expr, consumer, setop);
        }
    }

    fn scalar_subquery_lin(
        &mut self,
        select: &SelectNode,
        alias: Option<&str>,
        query_location: Option<u64>,
        consumer: &str,
        setop: Option<&SetopContext>,
    ) {
        let id = format!("scalar_subquery_{}", self.context.next_subquery_id());
        let label = alias
            .map(str::to_owned)
            .unwrap_or_else(|| sq_from_label(select.primary_source_label()));
        self.context.add_node(LineageNode {
            id: id.clone(),
            label,
            kind: LineageNodeKind::ScalarSubquery,
            alias: alias.map(str::to_owned),
            query_location,
            select_list: Some(select.select_list_labels()),
        });
        self.context.add_edge(LineageEdge::new(
            &id,
            consumer,
            RelationshipKind::ScalarSubquery,
            setop,
            None,
        ));
        self.select_node_lin(select, &id, setop);
    }

    /// Finds scalar subqueries anywhere in an expression tree. The body of a
    /// found subquery is only visited through `scalar_subquery_lin`.
    fn expr_subqueries_lin(
        &mut self,
        expr: &Expression,
        consumer: &str,
        setop: Option<&SetopContext>,
    ) {
        if let Some(select) = expr.subquery_select() {
            self.scalar_subquery_lin(select, None, expr.query_location, consumer, setop);
        }
        for child in expr.child_expressions() {
            self.expr_subqueries_lin(child, consumer, setop);
        }
    }

    #[allow(clippy::wrong_self_convention)]
    fn from_table_lin(
        &mut self,
        from_table: &FromTable,
        consumer: &str,
        join: Option<&JoinInfo>,
        alias_override: Option<&str>,
        setop: Option<&SetopContext>,
    ) {
        let alias = alias_override
            .or_else(|| from_table.declared_alias())
            .map(str::to_owned);

        match from_table {
            FromTable::BaseTable(table) => {
                let name = table
                    .table_name
                    .as_deref()
                    .unwrap_or(DEFAULT_BASE_TABLE_NAME);
                let kind = relationship(join, RelationshipKind::FromTable);

                // a cte with the same name shadows the table
                let cte_id = format!("cte:{}", name);
                if self.context.contains_node(&cte_id) {
                    if !self.context.has_edge(&cte_id, consumer) {
                        self.context
                            .add_edge(LineageEdge::new(&cte_id, consumer, kind, setop, join));
                    }
                    return;
                }

                let base_id = format!("base:{}", name);
                if !self.context.contains_node(&base_id) {
                    self.context.add_node(LineageNode {
                        id: base_id.clone(),
                        label: name.to_owned(),
                        kind: LineageNodeKind::BaseTable,
                        alias,
                        query_location: table.query_location,
                        select_list: None,
                    });
                }
                self.context
                    .add_edge(LineageEdge::new(&base_id, consumer, kind, setop, join));
            }
            FromTable::Subquery(subquery) => {
                let Some(statement) = from_table.subquery_statement() else {
                    log::debug!("Skipping subquery without a nested statement");
                    return;
                };
                let id = format!("subquery_{}", self.context.next_subquery_id());
                let label = match (&alias, statement.as_select()) {
                    (Some(alias), _) => alias.clone(),
                    (None, Some(select)) => sq_from_label(select.primary_source_label()),
                    (None, None) => sq_from_label(self.context.node_label(consumer)),
                };
                self.context.add_node(LineageNode {
                    id: id.clone(),
                    label,
                    kind: LineageNodeKind::Subquery,
                    alias,
                    query_location: subquery.query_location,
                    select_list: statement.as_select().map(SelectNode::select_list_labels),
                });
                self.context.add_edge(LineageEdge::new(
                    &id,
                    consumer,
                    relationship(join, RelationshipKind::FromSubquery),
                    setop,
                    join,
                ));
                self.statement_node_lin(statement, &id, setop);
            }
            FromTable::Join(join_ref) => self.join_lin(join_ref, consumer, setop),
            FromTable::TableFunction(function) => {
                let label = non_blank(function.alias.as_deref())
                    .or(function.function_name())
                    .unwrap_or(DEFAULT_TABLE_FUNCTION_LABEL)
                    .to_owned();
                let id = format!(
                    "table_function_{}",
                    self.context.next_table_function_id()
                );
                self.context.add_node(LineageNode {
                    id: id.clone(),
                    label,
                    kind: LineageNodeKind::TableFunction,
                    alias,
                    query_location: function.query_location,
                    select_list: None,
                });
                self.context.add_edge(LineageEdge::new(
                    &id,
                    consumer,
                    relationship(join, RelationshipKind::FromTableFunction),
                    setop,
                    join,
                ));
            }
            FromTable::Empty => {}
            FromTable::Unknown(tag) => log::debug!("Skipping unmodeled from_table {:?}", tag),
        }
    }

    fn join_lin(&mut self, join: &JoinRef, consumer: &str, setop: Option<&SetopContext>) {
        let condition = join.condition.as_ref();
        let (left_qualifier, right_qualifier) = condition_qualifiers(condition);
        let declared_alias = |side: &Option<Box<FromTable>>| {
            side.as_deref()
                .and_then(FromTable::declared_alias)
                .map(str::to_owned)
        };

        let join_info = JoinInfo {
            join_type: join.join_type.clone(),
            ref_type: join.ref_type.clone(),
            columns: if join.using_columns.is_empty() {
                condition_columns(condition)
            } else {
                Some(join.using_columns.clone())
            },
            left_alias: declared_alias(&join.left).or_else(|| left_qualifier.clone()),
            right_alias: declared_alias(&join.right).or_else(|| right_qualifier.clone()),
            condition_class: condition.and_then(|cond| cond.class.clone()),
            condition_type: condition.and_then(|cond| cond.r#type.clone()),
        };

        if let Some(left) = &join.left {
            self.from_table_lin(left, consumer, None, left_qualifier.as_deref(), setop);
        }
        if let Some(right) = &join.right {
            self.from_table_lin(
                right,
                consumer,
                Some(&join_info),
                right_qualifier.as_deref(),
                setop,
            );
        }
    }
}

fn log_lineage(idx: usize, lineage: &QueryLineage) {
    log::debug!("Lineage of statement {}:", idx);
    for node in &lineage.nodes {
        log::debug!("[{}]{} \"{}\"", node.kind, node.id, node.label);
    }
    for edge in &lineage.edges {
        log::debug!(
            "{} -[{}{}]-> {}",
            edge.from_id,
            edge.relationship_kind,
            edge.setop_side
                .map(|side| format!(" {}", side))
                .unwrap_or_default(),
            edge.to_id
        );
    }
}

/// Builds one lineage graph per statement.
///
/// Statements without a root node, or with a root that is neither a select
/// nor a set operation, are skipped. Never fails: shapes outside the modeled
/// subset contribute nothing to the graph.
pub fn extract_lineage(statements: &[Statement]) -> Vec<QueryLineage> {
    statements
        .iter()
        .enumerate()
        .filter_map(|(idx, statement)| {
            let node = match &statement.node {
                Some(StatementNode::Unknown(tag)) => {
                    log::debug!("Skipping statement {} with root {:?}", idx, tag);
                    return None;
                }
                Some(node) => node,
                None => {
                    log::debug!("Skipping statement {} without a root node", idx);
                    return None;
                }
            };
            let lineage = LineageExtractor::default().statement_lin(node);
            log_lineage(idx, &lineage);
            Some(lineage)
        })
        .collect()
}

/// Same as [`extract_lineage`], for a whole response. Error responses yield nothing.
pub fn extract_serialized_lineage(serialized: &SerializedSql) -> Vec<QueryLineage> {
    if !serialized.is_success() {
        return vec![];
    }
    extract_lineage(&serialized.statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statement(node: serde_json::Value) -> Statement {
        serde_json::from_value(json!({ "node": node })).unwrap()
    }

    fn base_table(name: &str) -> serde_json::Value {
        json!({"type": "BASE_TABLE", "table_name": name, "alias": ""})
    }

    fn select_from(from_table: serde_json::Value) -> serde_json::Value {
        json!({
            "type": "SELECT_NODE",
            "cte_map": {"map": []},
            "select_list": [{"class": "STAR", "type": "STAR"}],
            "from_table": from_table
        })
    }

    #[test]
    fn test_counters_reset_per_statement() {
        let sub = json!({"type": "SUBQUERY", "alias": "", "subquery": {"node": select_from(base_table("t"))}});
        let statements = vec![statement(select_from(sub.clone())), statement(select_from(sub))];
        let lineages = extract_lineage(&statements);
        assert_eq!(lineages.len(), 2);
        for lineage in &lineages {
            let sub = lineage.node("subquery_0").unwrap();
            assert_eq!(sub.label, "SQ FROM (t)");
            assert_eq!(sub.select_list, Some(vec!["*".to_owned()]));
        }
        assert_eq!(lineages[0], lineages[1]);
    }

    #[test]
    fn test_unknown_root_is_skipped() {
        let statements = vec![
            statement(json!({"type": "INSERT_NODE"})),
            Statement::default(),
            statement(select_from(base_table("t"))),
        ];
        let lineages = extract_lineage(&statements);
        assert_eq!(lineages.len(), 1);
        assert_eq!(lineages[0].nodes[0].id, MAIN_ID);
    }

    #[test]
    fn test_cte_shadows_base_table() {
        let node = json!({
            "type": "SELECT_NODE",
            "cte_map": {"map": [{
                "key": "c",
                "value": {"query": {"node": select_from(base_table("t"))}}
            }]},
            "select_list": [],
            "from_table": {
                "type": "JOIN",
                "join_type": "INNER",
                "left": base_table("c"),
                "right": base_table("c")
            }
        });
        let lineage = extract_lineage(&[statement(node)]).pop().unwrap();
        let ids: Vec<_> = lineage.nodes.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(ids, vec!["main", "cte:c", "base:t"]);
        // one edge from the cte declaration, none added by the two references
        assert_eq!(lineage.edges_from("cte:c").count(), 1);
        assert_eq!(
            lineage.edges_from("cte:c").next().unwrap().relationship_kind,
            RelationshipKind::Cte
        );
    }

    #[test]
    fn test_nested_set_operation_subquery_uses_consumer_label() {
        let setop = json!({
            "type": "SET_OPERATION_NODE",
            "setop_type": "EXCEPT",
            "left": select_from(base_table("a")),
            "right": select_from(base_table("b"))
        });
        let node = select_from(json!({"type": "SUBQUERY", "subquery": {"node": setop}}));
        let lineage = extract_lineage(&[statement(node)]).pop().unwrap();

        let sub = lineage.node("subquery_0").unwrap();
        assert_eq!(sub.label, "SQ FROM (main)");
        assert_eq!(sub.select_list, None);

        let into_sub: Vec<_> = lineage
            .edges
            .iter()
            .filter(|edge| edge.to_id == "subquery_0")
            .map(|edge| (edge.from_id.as_str(), edge.setop_side, edge.setop_type.as_deref()))
            .collect();
        assert_eq!(
            into_sub,
            vec![
                ("base:a", Some(SetopSide::Left), Some("EXCEPT")),
                ("base:b", Some(SetopSide::Right), Some("EXCEPT")),
            ]
        );
        let from_sub = lineage.edges_from("subquery_0").next().unwrap();
        assert_eq!(from_sub.setop_side, None);
    }

    #[test]
    fn test_error_response_yields_nothing() {
        let serialized = SerializedSql {
            error: Some(true),
            ..Default::default()
        };
        assert!(extract_serialized_lineage(&serialized).is_empty());
    }
}
