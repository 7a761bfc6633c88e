use serde::{Deserialize, Serialize};

use crate::ids::OwnerId;

/// Policy holder a claim belongs to; the recipient of payout notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: OwnerId,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Owner {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_trims_missing_parts() {
        let owner = Owner {
            id: OwnerId::new("o1"),
            email: "pat@example.com".into(),
            first_name: "Pat".into(),
            last_name: String::new(),
        };
        assert_eq!(owner.display_name(), "Pat");
    }
}
