//! Strongly typed identifiers.
//!
//! Every entity is keyed by a UUID, wrapped in a newtype so a resource id can
//! never be passed where a release target id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// A deployable resource (host, cluster, namespace, ...).
    ResourceId
);
define_id!(SystemId);
define_id!(EnvironmentId);
define_id!(DeploymentId);
define_id!(
    /// A candidate version of a deployment.
    DeploymentVersionId
);
define_id!(DeploymentVariableId);
define_id!(VariableValueId);
define_id!(JobAgentId);
define_id!(PolicyId);
define_id!(
    /// One resource x environment x deployment triple.
    ReleaseTargetId
);
define_id!(VersionReleaseId);
define_id!(VariableSetReleaseId);
define_id!(ReleaseId);
define_id!(JobId);
