//! Policy object embedded (base64 JSON) in every manifest
//!
//! Attribute evaluation belongs to the key access server; here the policy is
//! only the ordered list of attribute FQNs plus an optional dissemination list.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub uuid: String,
    pub body: PolicyBody,
}

/// Empty lists serialize as `null` to match the reference SDKs, which keeps
/// policy binding hashes comparable across implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBody {
    #[serde(
        rename = "dataAttributes",
        default,
        serialize_with = "serialize_empty_vec_as_null",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub data_attributes: Vec<DataAttribute>,
    #[serde(
        default,
        serialize_with = "serialize_empty_vec_as_null",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub dissem: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAttribute {
    pub attribute: String,
}

fn serialize_empty_vec_as_null<T, S>(vec: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: serde::Serializer,
{
    if vec.is_empty() {
        serializer.serialize_none()
    } else {
        vec.serialize(serializer)
    }
}

fn deserialize_null_as_empty_vec<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Policy {
    /// Build a policy with a fresh UUID from access-control labels, keeping their order
    pub fn from_labels(labels: &[String]) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            body: PolicyBody {
                data_attributes: labels
                    .iter()
                    .map(|attribute| DataAttribute {
                        attribute: attribute.clone(),
                    })
                    .collect(),
                dissem: Vec::new(),
            },
        }
    }

    /// Attribute FQNs in the order they were attached
    pub fn labels(&self) -> Vec<&str> {
        self.body
            .data_attributes
            .iter()
            .map(|a| a.attribute.as_str())
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_keep_order() {
        let labels = vec![
            "https://example.com/attr/attr1/value/value2".to_string(),
            "https://example.com/attr/attr1/value/value1".to_string(),
        ];
        let policy = Policy::from_labels(&labels);
        assert_eq!(policy.labels(), vec![labels[0].as_str(), labels[1].as_str()]);
        assert_eq!(policy.uuid.len(), 36);
    }

    #[test]
    fn test_empty_lists_serialize_as_null() {
        let policy = Policy::from_labels(&[]);
        let json = policy.to_json().unwrap();
        assert!(json.contains(r#""dataAttributes":null"#));
        assert!(json.contains(r#""dissem":null"#));

        let parsed = Policy::from_json(&json).unwrap();
        assert!(parsed.body.data_attributes.is_empty());
    }
}
