use url::Url;

/// Configuration for the [`crate::CacheFirst`] policy.
///
/// Bumping [`Options::version()`] on redeploy is the only way to replace the
/// cached resources. The next activation deletes every other partition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-1", serde(default, rename_all = "kebab-case"))]
pub struct Options {
    version: String,
    precache: Vec<String>,
    trusted_origins: Vec<String>,
    scope: Url,
    fill_on_miss: bool,
}

impl Options {
    /// The partition name used by [`Options::default()`].
    pub const DEFAULT_VERSION: &'static str = "dacapo-cache-v1";
    /// Resources fetched during installation by default: the site root and
    /// the main document.
    pub const DEFAULT_PRECACHE: &'static [&'static str] = &["/", "index.html"];
    /// Third-party origins which are always served cache-first by default: a
    /// package CDN and the two font service hosts.
    pub const DEFAULT_TRUSTED_ORIGINS: &'static [&'static str] = &[
        "https://unpkg.com",
        "https://fonts.googleapis.com",
        "https://fonts.gstatic.com",
    ];
    /// The scope relative precache entries are resolved against by default.
    pub const DEFAULT_SCOPE: &'static str = "http://localhost/";

    /// Create the [`Options`] used by the DaCapo application shell.
    pub fn new() -> Self {
        Options {
            version: String::from(Options::DEFAULT_VERSION),
            precache: Options::DEFAULT_PRECACHE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            trusted_origins: Options::DEFAULT_TRUSTED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            scope: default_scope(),
            fill_on_miss: false,
        }
    }

    /// The name of the current cache partition.
    pub fn version(&self) -> &str { &self.version }

    /// Set the [`Options::version()`].
    pub fn with_version<S: Into<String>>(self, version: S) -> Self {
        Options {
            version: version.into(),
            ..self
        }
    }

    /// The paths fetched and stored during installation, in order.
    ///
    /// These are also matched verbatim against a request's path when deciding
    /// whether to serve it cache-first.
    pub fn precache(&self) -> &[String] { &self.precache }

    /// Set the [`Options::precache()`] list.
    pub fn with_precache<I, S>(self, precache: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Options {
            precache: precache.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Origins (e.g. `"https://fonts.gstatic.com"`) whose requests are always
    /// served cache-first.
    pub fn trusted_origins(&self) -> &[String] { &self.trusted_origins }

    /// Set the [`Options::trusted_origins()`].
    pub fn with_trusted_origins<I, S>(self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Options {
            trusted_origins: origins.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// The URL the worker is registered at.
    pub fn scope(&self) -> &Url { &self.scope }

    /// Set the [`Options::scope()`].
    pub fn with_scope(self, scope: Url) -> Self { Options { scope, ..self } }

    /// Should a cache-eligible resource fetched from the network be stored
    /// for next time? Disabled by default.
    pub fn fill_on_miss(&self) -> bool { self.fill_on_miss }

    /// Set [`Options::fill_on_miss()`].
    pub fn set_fill_on_miss(self, fill_on_miss: bool) -> Self {
        Options {
            fill_on_miss,
            ..self
        }
    }

    /// Resolve each [`Options::precache()`] entry relative to the
    /// [`Options::scope()`].
    pub fn precache_urls(&self) -> Result<Vec<Url>, url::ParseError> {
        self.precache
            .iter()
            .map(|path| self.scope.join(path))
            .collect()
    }
}

impl Default for Options {
    fn default() -> Self { Options::new() }
}

fn default_scope() -> Url {
    Url::parse(Options::DEFAULT_SCOPE).expect("The default scope is valid")
}
