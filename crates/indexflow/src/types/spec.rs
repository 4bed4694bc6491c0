//! Op specs for sources, functions, storages and declarations.
//!
//! Each category is a closed sum type. The engine receives a spec as an
//! explicit kind tag plus the variant's own payload; see [`OpSpec`].
//! `Custom` variants carry their tag and payload verbatim for ops this
//! crate has no typed record for.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A spec that can be handed to the engine.
pub trait OpSpec {
    /// The kind tag the engine dispatches on, e.g. `"LocalFile"`.
    fn kind(&self) -> &str;

    /// The structured payload, without the tag.
    fn payload(&self) -> Result<Value, serde_json::Error>;
}

macro_rules! op_spec {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", content = "spec")]
        #[non_exhaustive]
        pub enum $name {
            $($variant($variant),)*
            Custom(CustomSpec),
        }

        impl OpSpec for $name {
            fn kind(&self) -> &str {
                match self {
                    $($name::$variant(_) => stringify!($variant),)*
                    $name::Custom(custom) => &custom.kind,
                }
            }

            fn payload(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $($name::$variant(inner) => serde_json::to_value(inner),)*
                    $name::Custom(custom) => Ok(custom.spec.clone()),
                }
            }
        }

        $(
            impl From<$variant> for $name {
                fn from(inner: $variant) -> Self {
                    $name::$variant(inner)
                }
            }
        )*

        impl From<CustomSpec> for $name {
            fn from(custom: CustomSpec) -> Self {
                $name::Custom(custom)
            }
        }
    };
}

/// An op this crate has no typed record for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSpec {
    pub kind: String,
    #[serde(default)]
    pub spec: Value,
}

impl CustomSpec {
    pub fn new(kind: impl Into<String>, spec: Value) -> Self {
        Self {
            kind: kind.into(),
            spec,
        }
    }
}

op_spec!(
    /// Where rows come from.
    SourceSpec { LocalFile, GoogleDrive }
);

op_spec!(
    /// A transform applied to data slices.
    FunctionSpec {
        SplitRecursively,
        SentenceTransformerEmbed,
        ExtractByLlm,
    }
);

op_spec!(
    /// An export target for collected rows.
    StorageSpec { Postgres, Qdrant, Neo4j }
);

op_spec!(
    /// A setup declaration independent of any data.
    DeclarationSpec { Neo4jDeclaration }
);

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFile {
    pub path: String,
    #[serde(default)]
    pub binary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_patterns: Option<Vec<String>>,
}

impl LocalFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            binary: false,
            included_patterns: None,
            excluded_patterns: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleDrive {
    pub service_account_credential_path: String,
    pub root_folder_ids: Vec<String>,
    #[serde(default)]
    pub binary: bool,
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitRecursively {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_languages: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceTransformerEmbed {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractByLlm {
    pub llm_spec: Value,
    pub output_type: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

// ---------------------------------------------------------------------------
// Storages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Postgres {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qdrant {
    pub collection_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_url: Option<String>,
}

/// `connection` names an auth entry holding the Neo4j credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neo4j {
    pub connection: String,
    pub mapping: Value,
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neo4jDeclaration {
    pub connection: String,
    pub nodes_label: String,
    pub primary_key_fields: Vec<String>,
    #[serde(default)]
    pub vector_indexes: Vec<super::options::VectorIndexDef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_tag_is_explicit() {
        let spec: SourceSpec = LocalFile::new("docs").into();
        assert_eq!(spec.kind(), "LocalFile");
        assert_eq!(
            spec.payload().unwrap(),
            json!({"path": "docs", "binary": false})
        );
    }

    #[test]
    fn custom_carries_its_own_tag() {
        let spec: FunctionSpec = CustomSpec::new("ParseJson", json!({"strict": true})).into();
        assert_eq!(spec.kind(), "ParseJson");
        assert_eq!(spec.payload().unwrap(), json!({"strict": true}));
    }

    #[test]
    fn spec_round_trips_with_adjacent_tag() {
        let spec = StorageSpec::Qdrant(Qdrant {
            collection_name: "chunks".into(),
            grpc_url: None,
        });
        let encoded = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            encoded,
            json!({"kind": "Qdrant", "spec": {"collection_name": "chunks"}})
        );
        let decoded: StorageSpec = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, spec);
    }
}
