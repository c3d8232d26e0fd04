use serde::{Deserialize, Serialize};

/// OWNER > ADMIN > MODERATOR > USER. Derive order matches declaration order below,
/// so `Role::Admin > Role::User` holds via the derived `PartialOrd`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Moderator,
    Admin,
    Owner,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER",
            Role::Admin => "ADMIN",
            Role::Moderator => "MODERATOR",
            Role::User => "USER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "OWNER" => Role::Owner,
            "ADMIN" => Role::Admin,
            "MODERATOR" => Role::Moderator,
            "USER" => Role::User,
            _ => return None,
        })
    }

    /// Roles that `set_role` may assign. OWNER is claimed, never assigned.
    pub fn assignable() -> [Role; 3] {
        [Role::Admin, Role::Moderator, Role::User]
    }
}

/// Actions gated by a minimum role. Not every dispatch path needs one (OWNER-only
/// actions like channel management are checked directly against `Role::Owner`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Ban,
    Unban,
    MuteUser,
    UnmuteUser,
    Announce,
    SetSlowMode,
}

/// Minimum role required to perform `action`.
pub fn min_role(action: Action) -> Role {
    match action {
        Action::Ban
        | Action::Unban
        | Action::MuteUser
        | Action::UnmuteUser
        | Action::Announce
        | Action::SetSlowMode => Role::Admin,
    }
}

pub fn has_permission(role: Role, action: Action) -> bool {
    role >= min_role(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Moderator);
        assert!(Role::Moderator > Role::User);
    }

    #[test]
    fn admin_actions_require_admin_or_above() {
        assert!(has_permission(Role::Admin, Action::Ban));
        assert!(has_permission(Role::Owner, Action::Ban));
        assert!(!has_permission(Role::Moderator, Action::Ban));
        assert!(!has_permission(Role::User, Action::Announce));
    }
}
