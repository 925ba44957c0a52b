use crate::error::{Error, Result};

/// Default root segment for all Raptor topics.
pub const DEFAULT_ROOT: &str = "raptor";

/// Builder for the key expressions a site/device pair owns.
///
/// Topics follow the pattern `<root>/<site>/<device>/<leaf>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    root: String,
    site: String,
    device: String,
}

impl TopicBuilder {
    /// Create a builder rooted at [`DEFAULT_ROOT`].
    pub fn new(site: impl Into<String>, device: impl Into<String>) -> Result<Self> {
        Self::with_root(DEFAULT_ROOT, site, device)
    }

    /// Create a builder with a custom root segment.
    pub fn with_root(
        root: impl Into<String>,
        site: impl Into<String>,
        device: impl Into<String>,
    ) -> Result<Self> {
        let builder = Self {
            root: root.into(),
            site: site.into(),
            device: device.into(),
        };
        validate_segment("root", &builder.root)?;
        validate_segment("site", &builder.site)?;
        validate_segment("device", &builder.device)?;
        Ok(builder)
    }

    /// The device prefix, `<root>/<site>/<device>`.
    pub fn prefix(&self) -> String {
        format!("{}/{}/{}", self.root, self.site, self.device)
    }

    /// Topic on which snapshots are published.
    ///
    /// # Example
    /// ```
    /// use raptor_common::topics::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("shop", "revpi-135593").unwrap();
    /// assert_eq!(topics.state(), "raptor/shop/revpi-135593/state");
    /// ```
    pub fn state(&self) -> String {
        format!("{}/state", self.prefix())
    }

    /// Topic on which operator commands arrive.
    ///
    /// # Example
    /// ```
    /// use raptor_common::topics::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("shop", "revpi-135593").unwrap();
    /// assert_eq!(topics.command(), "raptor/shop/revpi-135593/cmd");
    /// ```
    pub fn command(&self) -> String {
        format!("{}/cmd", self.prefix())
    }

    /// Administrative status topic (`@` marks the control channel).
    pub fn status(&self) -> String {
        format!("{}/@/status", self.prefix())
    }

    /// Wildcard matching every topic of this device.
    pub fn device_wildcard(&self) -> String {
        format!("{}/**", self.prefix())
    }
}

fn validate_segment(what: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::Topic(format!("{} cannot be empty", what)));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| matches!(c, '/' | '*' | '$' | '?' | '#'))
    {
        return Err(Error::Topic(format!(
            "{} '{}' contains reserved character '{}'",
            what, segment, c
        )));
    }
    Ok(())
}
