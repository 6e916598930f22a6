use serde_json::Value;
use std::cmp::Ordering;

use super::entity::Record;
use crate::error::TenancyError;
use crate::tenant::TenantId;

/// Filter over records. Evaluated in memory by [`Predicate::matches`] or
/// rendered as parameterised SQL by [`Predicate::to_sql`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Lt(String, Value),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    /// Ownership clause conjoined to every tenant-owned read
    pub fn tenant_is(tenant_id: TenantId) -> Self {
        Predicate::Eq("tenant_id".to_string(), Value::String(tenant_id.to_string()))
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All => other,
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => &record.field(field) == value,
            Predicate::Ne(field, value) => &record.field(field) != value,
            Predicate::In(field, values) => values.contains(&record.field(field)),
            Predicate::Gt(field, value) => {
                compare(&record.field(field), value) == Some(Ordering::Greater)
            }
            Predicate::Lt(field, value) => compare(&record.field(field), value) == Some(Ordering::Less),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }

    /// Parse a JSON where clause: `{field: value}`, `{field: {"$op": value}}`
    /// with `$eq $ne $in $gt $lt`, and `$and`/`$or`/`$not`.
    pub fn from_json(where_data: &Value) -> Result<Self, TenancyError> {
        let obj = match where_data {
            Value::Null => return Ok(Predicate::All),
            Value::Object(obj) => obj,
            _ => return Err(invalid("where clause must be an object")),
        };

        let mut parts = Vec::new();
        for (key, value) in obj {
            match key.as_str() {
                "$and" | "$or" => {
                    let arr = value
                        .as_array()
                        .ok_or_else(|| invalid(&format!("{} requires an array", key)))?;
                    let inner = arr.iter().map(Self::from_json).collect::<Result<Vec<_>, _>>()?;
                    parts.push(if key == "$and" {
                        Predicate::And(inner)
                    } else {
                        Predicate::Or(inner)
                    });
                }
                "$not" => parts.push(Predicate::Not(Box::new(Self::from_json(value)?))),
                op if op.starts_with('$') => {
                    return Err(invalid(&format!("unsupported operator {}", op)))
                }
                field => parts.extend(Self::field_conditions(field, value)?),
            }
        }

        Ok(match parts.len() {
            0 => Predicate::All,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        })
    }

    fn field_conditions(field: &str, value: &Value) -> Result<Vec<Predicate>, TenancyError> {
        let ops = match value {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => ops,
            // Implicit equality: { field: value }
            _ => return Ok(vec![Predicate::Eq(field.to_string(), value.clone())]),
        };

        ops.iter()
            .map(|(op, data)| {
                let field = field.to_string();
                Ok(match op.as_str() {
                    "$eq" => Predicate::Eq(field, data.clone()),
                    "$ne" | "$neq" => Predicate::Ne(field, data.clone()),
                    "$gt" => Predicate::Gt(field, data.clone()),
                    "$lt" => Predicate::Lt(field, data.clone()),
                    "$in" => match data {
                        Value::Array(values) if shares_one_type(values) => {
                            Predicate::In(field, values.clone())
                        }
                        Value::Array(_) => return Err(invalid("$in values must share one type")),
                        _ => return Err(invalid("$in requires an array")),
                    },
                    other => return Err(invalid(&format!("unsupported operator {}", other))),
                })
            })
            .collect()
    }

    /// Render as a SQL condition over `(id uuid, tenant_id uuid, data jsonb)`
    /// with `$n` placeholders starting after `param_offset`. Every parameter
    /// is bound as text.
    pub fn to_sql(&self, param_offset: usize) -> Result<(String, Vec<Option<String>>), TenancyError> {
        let mut builder = SqlBuilder {
            params: Vec::new(),
            offset: param_offset,
        };
        let sql = builder.build(self)?;
        Ok((sql, builder.params))
    }
}

fn invalid(message: &str) -> TenancyError {
    TenancyError::InvalidIdentifier(format!("invalid predicate: {}", message))
}

/// Non-null `$in` values are either all numbers or all non-numbers, so one
/// column cast fits every one of them.
fn shares_one_type(values: &[Value]) -> bool {
    let mut kinds = values.iter().filter(|v| !v.is_null()).map(Value::is_number);
    match kinds.next() {
        Some(first) => kinds.all(|kind| kind == first),
        None => true,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

struct SqlBuilder {
    params: Vec<Option<String>>,
    offset: usize,
}

impl SqlBuilder {
    fn param(&mut self, value: &Value) -> String {
        let text = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        self.params.push(text);
        format!("${}", self.offset + self.params.len())
    }

    /// Column expression plus the cast applied to its parameter
    fn column(field: &str, value: &Value) -> Result<(String, &'static str), TenancyError> {
        match field {
            "id" | "tenant_id" => Ok((format!("\"{}\"", field), "::uuid")),
            _ => {
                if field.is_empty()
                    || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(invalid(&format!("invalid field name '{}'", field)));
                }
                if value.is_number() {
                    Ok((format!("(\"data\"->>'{}')::numeric", field), "::numeric"))
                } else {
                    Ok((format!("(\"data\"->>'{}')", field), ""))
                }
            }
        }
    }

    fn build(&mut self, predicate: &Predicate) -> Result<String, TenancyError> {
        Ok(match predicate {
            Predicate::All => "1=1".to_string(),
            Predicate::Eq(field, value) => {
                let (column, cast) = Self::column(field, value)?;
                if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    format!("{} = {}{}", column, self.param(value), cast)
                }
            }
            Predicate::Ne(field, value) => {
                let (column, cast) = Self::column(field, value)?;
                if value.is_null() {
                    format!("{} IS NOT NULL", column)
                } else {
                    format!("{} IS DISTINCT FROM {}{}", column, self.param(value), cast)
                }
            }
            Predicate::In(field, values) => {
                if values.is_empty() {
                    return Ok("1=0".to_string());
                }
                if !shares_one_type(values) {
                    return Err(invalid("$in values must share one type"));
                }
                let sample = values.iter().find(|v| !v.is_null()).unwrap_or(&values[0]);
                let (column, cast) = Self::column(field, sample)?;
                let params: Vec<String> = values
                    .iter()
                    .map(|v| format!("{}{}", self.param(v), cast))
                    .collect();
                format!("{} IN ({})", column, params.join(", "))
            }
            Predicate::Gt(field, value) => {
                let (column, cast) = Self::column(field, value)?;
                format!("{} > {}{}", column, self.param(value), cast)
            }
            Predicate::Lt(field, value) => {
                let (column, cast) = Self::column(field, value)?;
                format!("{} < {}{}", column, self.param(value), cast)
            }
            Predicate::And(parts) => self.join(parts, " AND ", "1=1")?,
            Predicate::Or(parts) => self.join(parts, " OR ", "1=0")?,
            Predicate::Not(inner) => format!("NOT ({})", self.build(inner)?),
        })
    }

    fn join(&mut self, parts: &[Predicate], joiner: &str, empty: &str) -> Result<String, TenancyError> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let sql = parts
            .iter()
            .map(|p| self.build(p).map(|s| format!("({})", s)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sql.join(joiner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_where_clauses() {
        let parsed = Predicate::from_json(&json!({
            "status": "open",
            "priority": { "$gt": 2 },
            "$or": [ { "owner": "ana" }, { "owner": { "$in": ["bo", "cy"] } } ]
        }))
        .unwrap();

        let record = Record::new("tickets")
            .with_field("status", "open")
            .with_field("priority", 3)
            .with_field("owner", "cy");
        assert!(parsed.matches(&record));

        let low = record.clone().with_field("priority", 1);
        assert!(!parsed.matches(&low));
    }

    #[test]
    fn rejects_unknown_operators() {
        assert!(Predicate::from_json(&json!({ "n": { "$regex": "x" } })).is_err());
        assert!(Predicate::from_json(&json!({ "$xor": [] })).is_err());
        assert!(Predicate::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn tenant_clause_matches_only_owner() {
        let owner = TenantId::new();
        let other = TenantId::new();
        let predicate = Predicate::All.and(Predicate::tenant_is(owner));

        assert!(predicate.matches(&Record::new("t").with_tenant(owner)));
        assert!(!predicate.matches(&Record::new("t").with_tenant(other)));
        assert!(!predicate.matches(&Record::new("t")));
    }

    #[test]
    fn sql_is_parameterised() {
        let tenant = TenantId::new();
        let predicate = Predicate::tenant_is(tenant).and(Predicate::Or(vec![
            Predicate::eq("status", "open"),
            Predicate::Gt("priority".into(), json!(2)),
        ]));

        let (sql, params) = predicate.to_sql(0).unwrap();
        assert_eq!(
            sql,
            "(\"tenant_id\" = $1::uuid) AND (((\"data\"->>'status') = $2) OR ((\"data\"->>'priority')::numeric > $3::numeric))"
        );
        assert_eq!(
            params,
            vec![Some(tenant.to_string()), Some("open".to_string()), Some("2".to_string())]
        );
    }

    #[test]
    fn sql_rejects_unsafe_field_names() {
        let predicate = Predicate::eq("x'; DROP TABLE t; --", "y");
        assert!(predicate.to_sql(0).is_err());
    }

    #[test]
    fn empty_in_matches_nothing() {
        let predicate = Predicate::In("status".into(), vec![]);
        assert_eq!(predicate.to_sql(0).unwrap().0, "1=0");
        assert!(!predicate.matches(&Record::new("t").with_field("status", "open")));
    }

    #[test]
    fn mixed_type_in_is_rejected() {
        assert!(Predicate::from_json(&json!({ "n": { "$in": [1, "x"] } })).is_err());
        assert!(Predicate::In("n".into(), vec![json!("x"), json!(1)]).to_sql(0).is_err());

        let numbers = Predicate::from_json(&json!({ "n": { "$in": [null, 1, 2.5] } })).unwrap();
        let (sql, _) = numbers.to_sql(0).unwrap();
        assert!(sql.contains("::numeric IN ($1::numeric, $2::numeric, $3::numeric)"), "{}", sql);
    }
}
