//! Newtypes for Scaleway state labels and their provider-neutral mapping.

use std::ops::Deref;

use crate::provider::{InstanceStatus, VolumeStatus};

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

newtype!(InstanceState);
newtype!(VolumeState);

impl InstanceState {
    /// Maps the server state onto [`InstanceStatus`].
    pub(crate) fn to_status(&self) -> InstanceStatus {
        match self.as_str() {
            "running" => InstanceStatus::Running,
            "stopped" | "stopped in place" => InstanceStatus::Stopped,
            other => InstanceStatus::Transitioning(other.to_owned()),
        }
    }
}

impl VolumeState {
    /// Maps the volume state and its current holder onto [`VolumeStatus`].
    pub(crate) fn to_status(&self, server_id: Option<&str>) -> VolumeStatus {
        match (self.as_str(), server_id) {
            ("available" | "in_use", Some(holder)) => VolumeStatus::InUse {
                instance_id: holder.to_owned(),
            },
            ("available", None) => VolumeStatus::Available,
            ("error", _) => VolumeStatus::Error(self.0.clone()),
            (other, _) => VolumeStatus::Transitioning(other.to_owned()),
        }
    }
}
