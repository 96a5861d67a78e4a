use serde::{Deserialize, Serialize};

/// A named value produced by a program and kept in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Variable {
    /// Single text value
    Text(String),
    /// List of text values (chunks, matches, etc.)
    List(Vec<String>),
    Number(usize),
}

impl Variable {
    pub fn as_text(&self) -> String {
        match self {
            Variable::Text(s) => s.clone(),
            Variable::List(v) => v.join("\n"),
            Variable::Number(n) => n.to_string(),
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            Variable::Text(s) => vec![s.clone()],
            Variable::List(v) => v.clone(),
            Variable::Number(n) => vec![n.to_string()],
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Variable::Text(_) => "text",
            Variable::List(_) => "list",
            Variable::Number(_) => "number",
        }
    }

    /// Chars for text, items for lists, the value itself for numbers.
    pub fn len(&self) -> usize {
        match self {
            Variable::Text(s) => s.chars().count(),
            Variable::List(v) => v.len(),
            Variable::Number(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty text, empty lists and zero are false.
    pub fn truthy(&self) -> bool {
        !self.is_empty()
    }

    pub fn as_number(&self) -> Option<usize> {
        match self {
            Variable::Number(n) => Some(*n),
            Variable::Text(s) => s.trim().parse().ok(),
            Variable::List(_) => None,
        }
    }

    /// One-line description used by `SHOW_VARS`.
    pub fn describe(&self) -> String {
        match self {
            Variable::Text(s) => format!("text ({} chars)", s.chars().count()),
            Variable::List(v) => format!("list ({} items)", v.len()),
            Variable::Number(n) => format!("number = {n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let list = Variable::List(vec!["a".into(), "b".into()]);
        assert_eq!(list.as_text(), "a\nb");
        assert_eq!(list.len(), 2);
        assert_eq!(Variable::Text("42 ".into()).as_number(), Some(42));
        assert_eq!(Variable::Number(3).as_list(), vec!["3".to_string()]);
        assert!(!Variable::Text(String::new()).truthy());
        assert!(Variable::Number(1).truthy());
    }

    #[test]
    fn serialized_shape() {
        let json = serde_json::to_value(Variable::Number(7)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "number", "value": 7}));
        let back: Variable = serde_json::from_value(json).unwrap();
        assert_eq!(back, Variable::Number(7));
    }
}
