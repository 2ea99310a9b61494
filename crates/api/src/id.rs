//! Types dealing with client, request and task identity.

use std::sync::Arc;

macro_rules! imp_str_id {
    ($i:ident, $d:expr) => {
        #[doc = $d]
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $i(pub Arc<str>);

        impl std::ops::Deref for $i {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<&str> for $i {
            fn from(s: &str) -> Self {
                $i(s.into())
            }
        }

        impl From<String> for $i {
            fn from(s: String) -> Self {
                $i(s.into_boxed_str().into())
            }
        }

        impl std::fmt::Display for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::fmt::Debug for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl serde::Serialize for $i {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $i {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s: String = serde::Deserialize::deserialize(deserializer)?;
                Ok(s.into())
            }
        }
    };
}

imp_str_id!(
    ClientId,
    "The self-reported globally unique identity of a client."
);
imp_str_id!(
    RequestId,
    "Identifies one pending group operation (benchmark or map-reduce)."
);
imp_str_id!(TaskId, "Identifies one task within a map-reduce request.");
