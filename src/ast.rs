//! Typed view over the tree emitted by DuckDB's `json_serialize_sql()`.
//!
//! Only the fields the lineage extractor needs are modeled. Every field is
//! optional and decoded leniently: a field with an unexpected shape falls back
//! to its default instead of failing the whole document, and unknown fields are
//! ignored.

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn type_tag(value: &Value) -> Option<String> {
    value.get("type").and_then(Value::as_str).map(str::to_owned)
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Root of a `json_serialize_sql()` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SerializedSql {
    #[serde(default, deserialize_with = "lenient")]
    pub error: Option<bool>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub statements: Vec<Statement>,
    #[serde(default, deserialize_with = "lenient")]
    pub error_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub error_subtype: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub position: Option<String>,
}

impl SerializedSql {
    pub fn is_success(&self) -> bool {
        self.error == Some(false) && !self.statements.is_empty()
    }
}

/// One top-level statement. `named_param_map` and friends are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Statement {
    #[serde(default, deserialize_with = "lenient")]
    pub node: Option<StatementNode>,
}

#[derive(Debug, Clone)]
pub enum StatementNode {
    Select(Box<SelectNode>),
    SetOperation(Box<SetOperationNode>),
    Unknown(Option<String>),
}

impl<'de> Deserialize<'de> for StatementNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(StatementNode::from_value(Value::deserialize(deserializer)?))
    }
}

impl StatementNode {
    fn from_value(value: Value) -> Self {
        let tag = type_tag(&value);
        match tag.as_deref() {
            Some("SELECT_NODE") => serde_json::from_value(value)
                .map(|node| StatementNode::Select(Box::new(node)))
                .unwrap_or(StatementNode::Unknown(tag)),
            Some("SET_OPERATION_NODE") => serde_json::from_value(value)
                .map(|node| StatementNode::SetOperation(Box::new(node)))
                .unwrap_or(StatementNode::Unknown(tag)),
            _ => StatementNode::Unknown(tag),
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self, StatementNode::Select(_))
    }

    pub fn is_set_operation(&self) -> bool {
        matches!(self, StatementNode::SetOperation(_))
    }

    pub fn as_select(&self) -> Option<&SelectNode> {
        match self {
            StatementNode::Select(select) => Some(select.as_ref()),
            _ => None,
        }
    }

    pub fn query_location(&self) -> Option<u64> {
        match self {
            StatementNode::Select(select) => select.query_location,
            StatementNode::SetOperation(setop) => setop.query_location,
            StatementNode::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectNode {
    #[serde(default, deserialize_with = "lenient")]
    pub cte_map: CteMap,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub select_list: Vec<Expression>,
    #[serde(default, deserialize_with = "lenient")]
    pub from_table: Option<FromTable>,
    #[serde(default, deserialize_with = "lenient")]
    pub where_clause: Option<Expression>,
    #[serde(default, deserialize_with = "lenient")]
    pub having: Option<Expression>,
    #[serde(default, deserialize_with = "lenient")]
    pub qualify: Option<Expression>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub modifiers: Vec<ResultModifier>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
}

impl SelectNode {
    /// Output column labels: alias, column reference, `*`, `(scalar)` or `(expr)`.
    pub fn select_list_labels(&self) -> Vec<String> {
        self.select_list.iter().map(Expression::output_label).collect()
    }

    /// Leftmost table, CTE or function name reachable through the FROM clause.
    pub fn primary_source_label(&self) -> Option<&str> {
        self.from_table
            .as_ref()
            .and_then(FromTable::primary_source_label)
    }

    /// Expressions of every `ORDER BY` modifier, in order.
    pub fn order_expressions(&self) -> impl Iterator<Item = &Expression> {
        self.modifiers
            .iter()
            .filter(|modifier| modifier.r#type.as_deref() == Some("ORDER_MODIFIER"))
            .flat_map(|modifier| modifier.orders.iter())
            .filter_map(|order| order.expression.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetOperationNode {
    #[serde(default, deserialize_with = "lenient")]
    pub setop_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub left: Option<StatementNode>,
    #[serde(default, deserialize_with = "lenient")]
    pub right: Option<StatementNode>,
    #[serde(default, deserialize_with = "lenient")]
    pub cte_map: CteMap,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub modifiers: Vec<ResultModifier>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CteMap {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub map: Vec<CteMapEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CteMapEntry {
    #[serde(default, deserialize_with = "lenient")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<CteInfo>,
}

impl CteMapEntry {
    pub fn query_node(&self) -> Option<&StatementNode> {
        self.value
            .as_ref()
            .and_then(|info| info.query.as_ref())
            .and_then(|query| query.node.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CteInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub query: Option<Statement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultModifier {
    #[serde(default, deserialize_with = "lenient")]
    pub r#type: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub orders: Vec<OrderByNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderByNode {
    #[serde(default, deserialize_with = "lenient")]
    pub expression: Option<Expression>,
}

/// A parsed expression. Only the child-shaped fields used to look for nested
/// subqueries are kept, together with the few fields used for labels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expression {
    #[serde(default, deserialize_with = "lenient")]
    pub class: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub r#type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub column_names: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub function_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub subquery: Option<Box<Statement>>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub children: Vec<Expression>,
    #[serde(default, deserialize_with = "lenient")]
    pub child: Option<Box<Expression>>,
    #[serde(default, deserialize_with = "lenient")]
    pub left: Option<Box<Expression>>,
    #[serde(default, deserialize_with = "lenient")]
    pub right: Option<Box<Expression>>,
    #[serde(default, deserialize_with = "lenient")]
    pub expression: Option<Box<Expression>>,
    #[serde(default, deserialize_with = "lenient")]
    pub condition: Option<Box<Expression>>,
}

impl Expression {
    /// The select node of an embedded scalar subquery, if this expression is one.
    pub fn subquery_select(&self) -> Option<&SelectNode> {
        self.subquery
            .as_ref()
            .and_then(|statement| statement.node.as_ref())
            .and_then(StatementNode::as_select)
    }

    /// Children followed by the generic scan, in scan order.
    pub fn child_expressions(&self) -> impl Iterator<Item = &Expression> {
        self.children.iter().chain(
            [
                &self.child,
                &self.left,
                &self.right,
                &self.expression,
                &self.condition,
            ]
            .into_iter()
            .filter_map(|expr| expr.as_deref()),
        )
    }

    /// Qualified column reference, e.g. `l.library_id`.
    pub fn column_ref(&self) -> Option<String> {
        if self.column_names.is_empty() {
            None
        } else {
            Some(self.column_names.join("."))
        }
    }

    fn output_label(&self) -> String {
        if let Some(alias) = non_blank(self.alias.as_deref()) {
            return alias.trim().to_owned();
        }
        if let Some(column) = self.column_ref() {
            return column;
        }
        if self.r#type.as_deref().or(self.class.as_deref()) == Some("STAR") {
            return "*".to_owned();
        }
        if self.subquery.is_some() {
            return "(scalar)".to_owned();
        }
        "(expr)".to_owned()
    }
}

/// An entry of a FROM clause.
#[derive(Debug, Clone)]
pub enum FromTable {
    Empty,
    BaseTable(BaseTableRef),
    Subquery(SubqueryRef),
    Join(JoinRef),
    TableFunction(TableFunctionRef),
    /// Any shape not modeled above. Contributes no lineage.
    Unknown(Option<String>),
}

impl<'de> Deserialize<'de> for FromTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(FromTable::from_value(Value::deserialize(deserializer)?))
    }
}

fn narrow<T: DeserializeOwned>(
    value: Value,
    tag: Option<String>,
    wrap: impl FnOnce(T) -> FromTable,
) -> FromTable {
    match serde_json::from_value(value) {
        Ok(inner) => wrap(inner),
        Err(_) => FromTable::Unknown(tag),
    }
}

impl FromTable {
    fn from_value(value: Value) -> Self {
        let tag = type_tag(&value);
        let carries_query = value.get("subquery").is_some() || value.get("query").is_some();
        match tag.as_deref() {
            Some("BASE_TABLE") => narrow(value, tag, FromTable::BaseTable),
            Some("SUBQUERY" | "SUBQUERY_NODE") => narrow(value, tag, FromTable::Subquery),
            // unexpected shape whose only signal is a nested query
            _ if carries_query => narrow(value, tag, FromTable::Subquery),
            Some("JOIN" | "CROSS_PRODUCT") => narrow(value, tag, FromTable::Join),
            Some("TABLE_FUNCTION") => narrow(value, tag, FromTable::TableFunction),
            Some("EMPTY") => FromTable::Empty,
            _ => FromTable::Unknown(tag),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FromTable::Empty)
    }

    pub fn is_base_table(&self) -> bool {
        matches!(self, FromTable::BaseTable(_))
    }

    pub fn is_subquery(&self) -> bool {
        matches!(self, FromTable::Subquery(_))
    }

    pub fn is_join(&self) -> bool {
        matches!(self, FromTable::Join(_))
    }

    pub fn is_table_function(&self) -> bool {
        matches!(self, FromTable::TableFunction(_))
    }

    /// Nested statement of a subquery entry (SELECT or set operation).
    pub fn subquery_statement(&self) -> Option<&StatementNode> {
        match self {
            FromTable::Subquery(subquery) => subquery
                .subquery
                .as_ref()
                .and_then(|statement| statement.node.as_ref())
                .or(subquery.query.as_ref()),
            _ => None,
        }
    }

    /// Nested select node of a subquery entry.
    pub fn subquery_select(&self) -> Option<&SelectNode> {
        match self {
            FromTable::Subquery(subquery) => subquery
                .subquery
                .as_ref()
                .and_then(|statement| statement.node.as_ref())
                .and_then(StatementNode::as_select)
                .or_else(|| subquery.query.as_ref().and_then(StatementNode::as_select)),
            _ => None,
        }
    }

    /// Alias this entry can be referred to by in join conditions.
    pub fn declared_alias(&self) -> Option<&str> {
        match self {
            FromTable::BaseTable(table) => {
                non_blank(table.alias.as_deref()).or(table.table_name.as_deref())
            }
            FromTable::Subquery(subquery) => non_blank(subquery.alias.as_deref()),
            FromTable::TableFunction(function) => {
                non_blank(function.alias.as_deref()).or(function.function_name())
            }
            _ => None,
        }
    }

    /// Leftmost table, CTE or function name reachable through this entry.
    pub fn primary_source_label(&self) -> Option<&str> {
        match self {
            FromTable::BaseTable(table) => non_blank(table.table_name.as_deref()),
            FromTable::Subquery(_) => self
                .subquery_select()
                .and_then(SelectNode::primary_source_label),
            FromTable::Join(join) => join
                .left
                .as_deref()
                .and_then(FromTable::primary_source_label),
            FromTable::TableFunction(function) => {
                Some(function.function_name().unwrap_or("table_function"))
            }
            FromTable::Empty | FromTable::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseTableRef {
    #[serde(default, deserialize_with = "lenient")]
    pub table_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub schema_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubqueryRef {
    #[serde(default, deserialize_with = "lenient")]
    pub subquery: Option<Statement>,
    #[serde(default, deserialize_with = "lenient")]
    pub query: Option<StatementNode>,
    #[serde(default, deserialize_with = "lenient")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinRef {
    #[serde(default, deserialize_with = "lenient")]
    pub left: Option<Box<FromTable>>,
    #[serde(default, deserialize_with = "lenient")]
    pub right: Option<Box<FromTable>>,
    #[serde(default, deserialize_with = "lenient")]
    pub condition: Option<Expression>,
    #[serde(default, deserialize_with = "lenient")]
    pub join_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ref_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub using_columns: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableFunctionRef {
    #[serde(default, deserialize_with = "lenient")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub function: Option<Expression>,
    #[serde(default, deserialize_with = "lenient")]
    pub query_location: Option<u64>,
}

impl TableFunctionRef {
    pub fn function_name(&self) -> Option<&str> {
        self.function
            .as_ref()
            .and_then(|function| function.function_name.as_deref())
    }
}
