use serde::Serialize;

/// Stored data type of a generic attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Uri,
    Date,
    Measure,
    Set,
}

impl AttributeKind {
    pub fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            1 => Some(AttributeKind::String),
            2 => Some(AttributeKind::Integer),
            3 => Some(AttributeKind::Double),
            4 => Some(AttributeKind::Uri),
            5 => Some(AttributeKind::Date),
            6 => Some(AttributeKind::Measure),
            7 => Some(AttributeKind::Set),
            _ => None,
        }
    }
}

/// Value of a generic attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Double(f64),
    Uri(String),
    /// ISO date text, as stored
    Date(String),
    Measure { value: f64, uom: Option<String> },
    Set(Vec<GenericAttribute>),
}

/// Named attribute; sets nest further attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericAttribute {
    pub name: String,
    pub value: AttributeValue,
}

impl GenericAttribute {
    /// Find a direct or nested attribute by name, depth first
    pub fn find(&self, name: &str) -> Option<&GenericAttribute> {
        if self.name == name {
            return Some(self);
        }
        match &self.value {
            AttributeValue::Set(children) => children.iter().find_map(|child| child.find(name)),
            _ => None,
        }
    }
}
