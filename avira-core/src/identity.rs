/// Profile of a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Who is using the client. Only gates persistence and personalizes text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(UserProfile),
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated(_))
    }

    /// Name to address the user by: display name, then e-mail, then "User".
    pub fn display_name(&self) -> &str {
        match self {
            Identity::Authenticated(profile) => profile
                .name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(&profile.email),
            Identity::Anonymous => "User",
        }
    }

    pub fn greeting(&self) -> String {
        format!("Hello, {}!", self.display_name())
    }
}
