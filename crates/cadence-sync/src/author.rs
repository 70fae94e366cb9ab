//! Who the outgoing messages are attributed to.

use url::Url;

use cadence_shared::constants::{ANONYMOUS_NAME, AVATAR_SERVICE_URL, AVATAR_SIZE};
use cadence_shared::Author;

/// Account details supplied by the authentication layer.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl UserProfile {
    /// Local store key of the user's uploaded profile photo.
    pub fn photo_store_key(&self) -> String {
        format!("profile_photo_{}", self.uid)
    }

    /// Resolve the author shown on this user's messages.
    ///
    /// Name: display name, then e-mail, then `Anonymous`. Avatar: the photo
    /// stored on this device, then the account photo, then a generated one.
    pub fn to_author(&self, stored_photo: Option<String>) -> Author {
        let name = non_empty(self.display_name.as_deref())
            .or_else(|| non_empty(self.email.as_deref()))
            .unwrap_or(ANONYMOUS_NAME)
            .to_string();

        let avatar = stored_photo
            .filter(|p| !p.is_empty())
            .or_else(|| non_empty(self.photo_url.as_deref()).map(String::from))
            .unwrap_or_else(|| generated_avatar(&name));

        Author {
            id: self.uid.clone(),
            name,
            avatar,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn generated_avatar(name: &str) -> String {
    let size = AVATAR_SIZE.to_string();
    Url::parse_with_params(
        AVATAR_SERVICE_URL,
        [("name", name), ("size", size.as_str()), ("background", "random")],
    )
    .map(String::from)
    .unwrap_or_else(|_| AVATAR_SERVICE_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            uid: "u1".into(),
            display_name: Some("Ada Lovelace".into()),
            email: Some("ada@example.com".into()),
            photo_url: Some("https://example.com/ada.png".into()),
        }
    }

    #[test]
    fn test_stored_photo_wins() {
        let author = profile().to_author(Some("data:image/png;base64,xyz".into()));
        assert_eq!(author.avatar, "data:image/png;base64,xyz");
        assert_eq!(author.name, "Ada Lovelace");
        assert_eq!(author.id, "u1");
    }

    #[test]
    fn test_account_photo_fallback() {
        let author = profile().to_author(None);
        assert_eq!(author.avatar, "https://example.com/ada.png");
    }

    #[test]
    fn test_name_falls_back_to_email_then_anonymous() {
        let mut p = profile();
        p.display_name = None;
        assert_eq!(p.to_author(None).name, "ada@example.com");

        p.email = Some("  ".into());
        assert_eq!(p.to_author(None).name, "Anonymous");
    }

    #[test]
    fn test_generated_avatar() {
        let mut p = profile();
        p.photo_url = None;
        let author = p.to_author(None);
        assert!(author.avatar.starts_with("https://ui-avatars.com/api/?name=Ada+Lovelace"));
        assert!(author.avatar.contains("size=200"));
        assert!(author.avatar.ends_with("background=random"));
    }

    #[test]
    fn test_photo_store_key() {
        assert_eq!(profile().photo_store_key(), "profile_photo_u1");
    }
}
