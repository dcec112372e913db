use validator::validate_email;

/// A syntactically valid email address.
#[derive(Clone, Debug)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(address: String) -> Result<EmailAddress, String> {
        if validate_email(&address) {
            Ok(Self(address))
        } else {
            Err(format!("`{}` is not a valid email address", address))
        }
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
