//! Volume options, WebDAV connection parameters and mount flags.
//!
//! Parameters (volume context) and secrets arrive as free-form string maps
//! with case-insensitive keys.  [`VolumeOptions`] folds them into a single
//! lookup table keyed by [`OptionKey`]: secrets are applied first and
//! parameters override them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

/// Username that needs no password.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Filesystem type handed to the mount helper for WebDAV shares.
pub const WEBDAV_FS_TYPE: &str = "davfs";

/// Validation failures while resolving connection parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("argument url is empty")]
    MissingEndpoint,
    #[error("argument password is empty")]
    MissingPassword,
}

/// Option keys recognized in volume context and secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    /// `provisioning_mode`
    ProvisioningMode,
    /// `client`, or its alias `driver`
    Client,
    /// `url`
    Url,
    /// `user`
    User,
    /// `password`
    Password,
}

impl OptionKey {
    /// Map a raw key onto a recognized option, ignoring case.
    pub fn parse(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "provisioning_mode" => Some(Self::ProvisioningMode),
            "client" | "driver" => Some(Self::Client),
            "url" => Some(Self::Url),
            "user" => Some(Self::User),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

/// Recognized options merged from secrets and parameters.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VolumeOptions {
    values: BTreeMap<OptionKey, String>,
}

impl VolumeOptions {
    /// Merge `secrets` then `parameters`; a parameter wins over a secret
    /// carrying the same logical key.
    pub fn merge(parameters: &HashMap<String, String>, secrets: &HashMap<String, String>) -> Self {
        let mut options = Self::default();
        options.apply(secrets);
        options.apply(parameters);
        options
    }

    /// Options read from a single map, e.g. the volume context alone.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut options = Self::default();
        options.apply(map);
        options
    }

    fn apply(&mut self, map: &HashMap<String, String>) {
        // Sort so that keys differing only in case resolve the same way on
        // every call.
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in entries {
            if let Some(key) = OptionKey::parse(key) {
                self.values.insert(key, value.clone());
            }
        }
    }

    /// Value for `key`; empty values count as absent.
    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.values
            .get(&key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl fmt::Debug for VolumeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            match key {
                OptionKey::Password => map.entry(key, &"<redacted>"),
                _ => map.entry(key, value),
            };
        }
        map.finish()
    }
}

/// Layer request secrets over node-level default secrets.
pub fn layered_secrets(
    defaults: &HashMap<String, String>,
    request: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut secrets: HashMap<String, String> = defaults
        .iter()
        .filter(|(key, _)| !request.keys().any(|k| k.eq_ignore_ascii_case(key)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    secrets.extend(request.iter().map(|(k, v)| (k.clone(), v.clone())));
    secrets
}

// ---------------------------------------------------------------------------
// Client type & provisioning mode
// ---------------------------------------------------------------------------

/// Filesystem client used to reach the remote share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// WebDAV through davfs2.
    WebDav,
}

impl ClientType {
    /// Parse a client name, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "webdav" => Some(Self::WebDav),
            _ => None,
        }
    }

    /// Client named by the options, or `default` when absent or unknown.
    pub fn resolve(options: &VolumeOptions, default: ClientType) -> Self {
        options
            .get(OptionKey::Client)
            .and_then(Self::parse)
            .unwrap_or(default)
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebDav => f.write_str("webdav"),
        }
    }
}

/// How a volume is attached to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// One remote mount per publish path.
    Static,
    /// A shared staging mount, bind-mounted into each publish path.
    Dynamic,
}

impl ProvisioningMode {
    /// Read `provisioning_mode` from a volume context.  Only `dynamic`
    /// (any case) selects dynamic mode.
    pub fn from_context(volume_context: &HashMap<String, String>) -> Self {
        match VolumeOptions::from_map(volume_context).get(OptionKey::ProvisioningMode) {
            Some(mode) if mode.eq_ignore_ascii_case("dynamic") => Self::Dynamic,
            _ => Self::Static,
        }
    }
}

// ---------------------------------------------------------------------------
// WebDAV connection
// ---------------------------------------------------------------------------

/// Validated WebDAV endpoint and credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct WebDavConnection {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl WebDavConnection {
    pub fn resolve(options: &VolumeOptions) -> Result<Self, ParamError> {
        let user = options
            .get(OptionKey::User)
            .unwrap_or(ANONYMOUS_USER)
            .to_owned();
        let password = options
            .get(OptionKey::Password)
            .unwrap_or_default()
            .to_owned();

        if password.is_empty() && user != ANONYMOUS_USER {
            return Err(ParamError::MissingPassword);
        }

        let url = options
            .get(OptionKey::Url)
            .ok_or(ParamError::MissingEndpoint)?
            .to_owned();

        Ok(Self {
            url,
            user,
            password,
        })
    }

    /// Whether credentials have to be handed to the mount helper.
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && self.user != ANONYMOUS_USER && !self.password.is_empty()
    }
}

impl fmt::Debug for WebDavConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavConnection")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mount flags
// ---------------------------------------------------------------------------

/// Effective mount flags: `ro` first when read-only, then the capability's
/// flags without duplicates, in order of first occurrence.
pub fn mount_flags(read_only: bool, capability_flags: &[String]) -> Vec<String> {
    let mut flags: Vec<String> = Vec::with_capacity(capability_flags.len() + 1);
    if read_only {
        flags.push("ro".to_owned());
    }
    for flag in capability_flags {
        if !flags.contains(flag) {
            flags.push(flag.clone());
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn anonymous_from_secret_url() {
        let options = VolumeOptions::merge(&map(&[]), &map(&[("url", "http://x")]));
        let conn = WebDavConnection::resolve(&options).unwrap();
        assert_eq!(conn.url, "http://x");
        assert_eq!(conn.user, ANONYMOUS_USER);
        assert_eq!(conn.password, "");
        assert!(!conn.has_credentials());
    }

    #[test]
    fn user_without_password_is_rejected() {
        let options = VolumeOptions::merge(&map(&[("url", "http://x"), ("user", "bob")]), &map(&[]));
        assert_eq!(
            WebDavConnection::resolve(&options),
            Err(ParamError::MissingPassword)
        );
    }

    #[test]
    fn missing_url_is_rejected() {
        let options = VolumeOptions::merge(&map(&[("user", "bob")]), &map(&[("password", "pw")]));
        assert_eq!(
            WebDavConnection::resolve(&options),
            Err(ParamError::MissingEndpoint)
        );
    }

    #[test]
    fn parameters_override_secrets_case_insensitively() {
        let options = VolumeOptions::merge(
            &map(&[("URL", "http://params")]),
            &map(&[("url", "http://secrets"), ("User", "bob"), ("PASSWORD", "pw")]),
        );
        let conn = WebDavConnection::resolve(&options).unwrap();
        assert_eq!(conn.url, "http://params");
        assert_eq!(conn.user, "bob");
        assert_eq!(conn.password, "pw");
        assert!(conn.has_credentials());
    }

    #[test]
    fn debug_output_hides_password() {
        let options = VolumeOptions::merge(
            &map(&[]),
            &map(&[("url", "http://x"), ("user", "bob"), ("password", "hunter2")]),
        );
        assert!(!format!("{options:?}").contains("hunter2"));
        let conn = WebDavConnection::resolve(&options).unwrap();
        assert!(!format!("{conn:?}").contains("hunter2"));
    }

    #[test]
    fn client_type_falls_back_to_default() {
        let options = VolumeOptions::merge(&map(&[("driver", "nfs")]), &map(&[]));
        assert_eq!(ClientType::resolve(&options, ClientType::WebDav), ClientType::WebDav);

        let options = VolumeOptions::merge(&map(&[]), &map(&[("Client", "WebDAV")]));
        assert_eq!(ClientType::resolve(&options, ClientType::WebDav), ClientType::WebDav);
        assert_eq!(ClientType::parse("ftp"), None);
    }

    #[test]
    fn provisioning_mode_from_context() {
        assert_eq!(
            ProvisioningMode::from_context(&map(&[("Provisioning_Mode", "DYNAMIC")])),
            ProvisioningMode::Dynamic
        );
        assert_eq!(
            ProvisioningMode::from_context(&map(&[("provisioning_mode", "static")])),
            ProvisioningMode::Static
        );
        assert_eq!(ProvisioningMode::from_context(&map(&[])), ProvisioningMode::Static);
    }

    #[test]
    fn node_secrets_are_overridden_by_request_secrets() {
        let secrets = layered_secrets(
            &map(&[("user", "node"), ("password", "node-pw")]),
            &map(&[("user", "vol")]),
        );
        assert_eq!(secrets["user"], "vol");
        assert_eq!(secrets["password"], "node-pw");

        let secrets = layered_secrets(&map(&[("user", "node")]), &map(&[("User", "vol")]));
        assert!(!secrets.contains_key("user"));
        let options = VolumeOptions::merge(&map(&[]), &secrets);
        assert_eq!(options.get(OptionKey::User), Some("vol"));
    }

    #[test]
    fn mount_flags_are_deduplicated_in_order() {
        let flags = mount_flags(false, &["ro".into(), "ro".into(), "noatime".into()]);
        assert_eq!(flags, vec!["ro", "noatime"]);

        let flags = mount_flags(true, &["noatime".into(), "ro".into()]);
        assert_eq!(flags, vec!["ro", "noatime"]);
    }
}
