//! Transfer address parsing.
//!
//! Addresses use an scp-like grammar:
//!
//! ```text
//! [ [ credential "@" ] [ host-or-connection ] "::" ] image-reference
//! ```
//!
//! `credential` is a user name or `uid[:gid]`. Everything before the last
//! `::` is addressing information; everything after it is the image
//! reference. Without `::` the whole string is an image in the invoking
//! user's local store, even when it contains `@` (digests do).
//!
//! A host segment without dots that is not an IP address names a connection
//! from `containers.conf`. `localhost` and loopback addresses name the local
//! machine, which is how cross-user transfers are written
//! (`root@localhost::alpine`).

use std::fmt;
use std::net::IpAddr;

use crate::error::AddressError;


const SEPARATOR: &str = "::";

/// The account an endpoint acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A user name, resolved through the local user database or used as the
    /// remote login.
    Name(String),
    /// A numeric uid with an optional gid.
    Ids {
        /// User id.
        uid: u32,
        /// Group id; the user's primary group when absent.
        gid: Option<u32>,
    },
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Ids { uid, gid: None } => write!(f, "{uid}"),
            Self::Ids {
                uid,
                gid: Some(gid),
            } => write!(f, "{uid}:{gid}"),
        }
    }
}

/// Where an endpoint's image store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// This machine.
    Local,
    /// An explicit remote host reached over the secure shell.
    Host {
        /// Host name or IP address, without brackets.
        host: String,
        /// Port, when written in the address.
        port: Option<u16>,
    },
    /// A named connection from `containers.conf`.
    Connection(String),
}

/// One side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    credential: Option<Credential>,
    location: Location,
    image: String,
}

impl Endpoint {
    /// Creates an endpoint for `image` in the invoking user's local store.
    #[must_use]
    pub fn local(image: impl Into<String>) -> Self {
        Self {
            credential: None,
            location: Location::Local,
            image: image.into(),
        }
    }

    /// Creates an endpoint for `image` in the local store of `credential`.
    #[must_use]
    pub fn local_as(credential: Credential, image: impl Into<String>) -> Self {
        Self {
            credential: Some(credential),
            location: Location::Local,
            image: image.into(),
        }
    }

    /// Returns the credential written in the address, if any.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Returns where the endpoint's image store lives.
    #[must_use]
    pub const fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Returns `true` when neither a host nor a connection was given.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self.location, Location::Local)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() && self.credential.is_none() {
            return f.write_str(&self.image);
        }
        if let Some(credential) = &self.credential {
            write!(f, "{credential}@")?;
        }
        match &self.location {
            Location::Local => f.write_str("localhost")?,
            Location::Connection(alias) => f.write_str(alias)?,
            Location::Host { host, port } => {
                if host.contains(':') {
                    write!(f, "[{host}]")?;
                } else {
                    f.write_str(host)?;
                }
                if let Some(port) = port {
                    write!(f, ":{port}")?;
                }
            }
        }
        write!(f, "{SEPARATOR}{}", self.image)
    }
}

/// A parsed destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The address named an endpoint.
    Endpoint(Endpoint),
    /// No destination was given: the image goes to the other local account
    /// (root for ordinary users, the invoking user for root).
    Counterpart {
        /// The image reference, inherited from the source.
        image: String,
    },
}

/// Parses a source address.
///
/// # Errors
///
/// Returns `AddressError::Empty` for an empty string,
/// `AddressError::MissingImage` when `::` is not followed by an image, and
/// `AddressError::InvalidCredential`/`InvalidHost` for malformed addressing.
pub fn parse_source(raw: &str) -> Result<Endpoint, AddressError> {
    if raw.is_empty() {
        return Err(AddressError::Empty);
    }
    let (addressing, image) = split_address(raw);
    if image.is_empty() {
        return Err(AddressError::MissingImage {
            address: raw.to_owned(),
        });
    }
    build_endpoint(raw, addressing, image)
}

/// Parses a destination address relative to an already parsed `source`.
///
/// An empty image reference after `::` inherits the source image; an empty
/// address yields [`Destination::Counterpart`].
///
/// # Errors
///
/// Returns `AddressError::InvalidCredential`/`InvalidHost` for malformed
/// addressing.
pub fn parse_destination(raw: &str, source: &Endpoint) -> Result<Destination, AddressError> {
    if raw.is_empty() {
        return Ok(Destination::Counterpart {
            image: source.image().to_owned(),
        });
    }
    let (addressing, image) = split_address(raw);
    let image = if image.is_empty() {
        source.image()
    } else {
        image
    };
    build_endpoint(raw, addressing, image).map(Destination::Endpoint)
}

/// Splits an address at the last `::` into addressing and image parts.
fn split_address(raw: &str) -> (Option<&str>, &str) {
    raw.rsplit_once(SEPARATOR)
        .map_or((None, raw), |(addressing, image)| (Some(addressing), image))
}

fn build_endpoint(
    raw: &str,
    addressing: Option<&str>,
    image: &str,
) -> Result<Endpoint, AddressError> {
    let Some(addressing) = addressing else {
        return Ok(Endpoint::local(image));
    };

    let (credential, host) = match addressing.split_once('@') {
        Some((credential, host)) => (Some(parse_credential(raw, credential)?), host),
        None => (None, addressing),
    };

    Ok(Endpoint {
        credential,
        location: parse_location(raw, host)?,
        image: image.to_owned(),
    })
}

fn parse_credential(raw: &str, text: &str) -> Result<Credential, AddressError> {
    let invalid = |reason: &str| AddressError::InvalidCredential {
        address: raw.to_owned(),
        reason: reason.to_owned(),
    };

    if text.is_empty() {
        return Err(invalid("empty user before '@'"));
    }
    if text.starts_with('-') {
        return Err(invalid(&format!("'{text}' may not start with '-'")));
    }

    let looks_numeric = text.starts_with(|c: char| c.is_ascii_digit()) || text.contains(':');
    if looks_numeric {
        let (uid_text, gid_text) = match text.split_once(':') {
            Some((uid, gid)) => (uid, Some(gid)),
            None => (text, None),
        };
        let uid = uid_text
            .parse::<u32>()
            .map_err(|_| invalid(&format!("'{text}' is not a valid uid[:gid]")))?;
        let gid = gid_text
            .map(|gid| {
                gid.parse::<u32>()
                    .map_err(|_| invalid(&format!("'{text}' is not a valid uid[:gid]")))
            })
            .transpose()?;
        return Ok(Credential::Ids { uid, gid });
    }

    if text
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '@')
    {
        return Err(invalid(&format!("'{text}' is not a valid user name")));
    }
    Ok(Credential::Name(text.to_owned()))
}

fn parse_location(raw: &str, text: &str) -> Result<Location, AddressError> {
    let invalid = |reason: String| AddressError::InvalidHost {
        address: raw.to_owned(),
        reason,
    };

    if text.is_empty() {
        return Ok(Location::Local);
    }

    let (host, port, bracketed) = if let Some(rest) = text.strip_prefix('[') {
        let Some((host, after)) = rest.split_once(']') else {
            return Err(invalid(format!("unterminated '[' in host '{text}'")));
        };
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':').ok_or_else(|| {
                invalid(format!("unexpected text after ']' in host '{text}'"))
            })?),
        };
        (host, port, true)
    } else {
        match text.rsplit_once(':') {
            Some((host, port)) => (host, Some(port), false),
            None => (text, None, false),
        }
    };

    if host.is_empty()
        || host.starts_with('-')
        || host.chars().any(|c| c.is_whitespace() || c == '/')
    {
        return Err(invalid(format!("'{text}' is not a valid host")));
    }

    let port = port
        .map(|port| {
            port.parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| invalid(format!("'{port}' is not a valid port")))
        })
        .transpose()?;

    let address = host.parse::<IpAddr>().ok();
    if bracketed && address.is_none() {
        return Err(invalid(format!("'{host}' is not an IP address")));
    }

    if port.is_none() && is_loopback(host, address) {
        return Ok(Location::Local);
    }

    if address.is_some() || host.contains('.') || port.is_some() {
        return Ok(Location::Host {
            host: host.to_owned(),
            port,
        });
    }

    Ok(Location::Connection(host.to_owned()))
}

fn is_loopback(host: &str, address: Option<IpAddr>) -> bool {
    host.eq_ignore_ascii_case("localhost") || address.is_some_and(|ip| ip.is_loopback())
}
