use std::fmt;

const DEFAULT_TAG: &str = "latest";

/// An image reference split the way the Docker Engine API wants it:
/// repository (`[registry/]path/name`) and tag or digest as separate parameters.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub reference: Reference,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reference {
    Tag(String),
    Digest(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingRepository,
    InvalidFormat(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingRepository => write!(f, "repository is missing"),
            ParseError::InvalidFormat(image) => write!(f, "invalid image format: {}", image),
        }
    }
}

#[cfg(test)]
impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Reference::Tag(tag) => write!(f, "{}:{}", self.repository, tag),
            Reference::Digest(digest) => write!(f, "{}@{}", self.repository, digest),
        }
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let (repository, reference) = if let Some((repository, digest)) = s.split_once('@') {
            if digest.is_empty() {
                return Err(ParseError::InvalidFormat(s.to_string()));
            }
            (repository, Reference::Digest(digest.to_string()))
        } else {
            // a colon before the last slash belongs to a registry port, not a tag
            let last_slash = s.rfind('/').map(|pos| pos + 1).unwrap_or(0);
            match s[last_slash..].rfind(':') {
                Some(pos) => {
                    let pos = last_slash + pos;
                    let tag = &s[pos + 1..];
                    if tag.is_empty() {
                        return Err(ParseError::InvalidFormat(s.to_string()));
                    }
                    (&s[..pos], Reference::Tag(tag.to_string()))
                }
                None => (s, Reference::Tag(DEFAULT_TAG.to_string())),
            }
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(ParseError::MissingRepository);
        }

        Ok(Self {
            repository: repository.to_string(),
            reference,
        })
    }

    /// Value for the `tag` query parameter of the pull and push endpoints.
    pub fn tag_or_digest(&self) -> &str {
        match &self.reference {
            Reference::Tag(tag) => tag,
            Reference::Digest(digest) => digest,
        }
    }
}
