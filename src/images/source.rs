//! Image source resolution
//!
//! Classifies the destination of a markdown image into a typed source.
//! Resolution never fails: anything that cannot be located becomes an
//! unresolved sidecar source or an unverified document-relative path, so the
//! preview can show exactly what it tried.
//!
//! Rules are tried in order and the first match wins:
//!
//! | # | rule                         | result                         |
//! |---|------------------------------|--------------------------------|
//! | 1 | empty destination            | unresolved sidecar             |
//! | 2 | valid `http(s)://` URL       | remote                         |
//! | 3 | leading `/`                  | absolute                       |
//! | 4 | `./` or `../` with document  | document-relative              |
//! | 5 | traversal characters         | unresolved sidecar             |
//! | 6 | file next to the document    | document-relative              |
//! | 7 | sidecar manifest entry       | resolved sidecar               |
//! | 8 | file in the sidecar folder   | resolved sidecar               |
//! | 9 | document known               | document-relative (unverified) |
//! | 10| fallback                     | unresolved sidecar             |

use crate::markdown::parse_destination;
use reqwest::Url;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Where an image's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// An http(s) URL
    Remote(Url),
    /// An absolute filesystem path
    Absolute(PathBuf),
    /// A path relative to the document's directory, already joined
    DocumentRelative(PathBuf),
    /// A file in the document's sidecar directory
    Sidecar {
        filename: String,
        resolved_path: Option<PathBuf>,
    },
}

impl ImageSource {
    /// The local file to load, if this source is local and resolved
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            ImageSource::Absolute(path) | ImageSource::DocumentRelative(path) => Some(path),
            ImageSource::Sidecar {
                resolved_path: Some(path),
                ..
            } => Some(path),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageSource::Remote(_))
    }

    /// What was attempted, for "not found" placeholders
    pub fn display_target(&self) -> String {
        match self {
            ImageSource::Remote(url) => url.to_string(),
            ImageSource::Absolute(path) | ImageSource::DocumentRelative(path) => {
                path.display().to_string()
            }
            ImageSource::Sidecar {
                resolved_path: Some(path),
                ..
            } => path.display().to_string(),
            ImageSource::Sidecar { filename, .. } => filename.clone(),
        }
    }

    /// Short name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Remote(_) => "remote",
            ImageSource::Absolute(_) => "absolute",
            ImageSource::DocumentRelative(_) => "document-relative",
            ImageSource::Sidecar { .. } => "sidecar",
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.display_target())
    }
}

/// Read-only view of a sidecar directory used during resolution
pub trait SidecarLookup {
    /// The sidecar directory, whether or not it exists yet
    fn sidecar_directory(&self) -> Option<&Path>;

    /// Manifest lookup by filename
    fn lookup(&self, filename: &str) -> Option<PathBuf>;
}

/// Inputs shared by every resolution rule
pub struct ResolveContext<'a> {
    /// Normalized destination
    pub source: &'a str,
    pub document_dir: Option<PathBuf>,
    pub sidecar: Option<&'a dyn SidecarLookup>,
}

pub type Rule = fn(&ResolveContext<'_>) -> Option<ImageSource>;

/// Resolution rules in priority order
pub const RULES: &[(&str, Rule)] = &[
    ("empty", empty_source),
    ("remote", remote_url),
    ("absolute", absolute_path),
    ("explicit-relative", explicit_relative),
    ("traversal-guard", traversal_guard),
    ("document-relative", existing_document_relative),
    ("sidecar-manifest", sidecar_manifest),
    ("sidecar-direct", sidecar_direct),
    ("unverified-relative", unverified_document_relative),
];

/// Resolve a raw markdown image destination
pub fn resolve(
    raw: &str,
    document_path: Option<&Path>,
    sidecar: Option<&dyn SidecarLookup>,
) -> ImageSource {
    let normalized = parse_destination(raw);
    resolve_normalized(&normalized, document_path, sidecar)
}

/// Resolve a destination that has already been through CommonMark normalization
pub fn resolve_normalized(
    source: &str,
    document_path: Option<&Path>,
    sidecar: Option<&dyn SidecarLookup>,
) -> ImageSource {
    let context = ResolveContext {
        source,
        document_dir: document_path.and_then(|p| p.parent()).map(standardize),
        sidecar,
    };

    for (name, rule) in RULES {
        if let Some(resolved) = rule(&context) {
            log::trace!("Resolved {:?} via {} rule: {}", source, name, resolved);
            return resolved;
        }
    }

    log::debug!("Could not resolve image {:?}", source);
    unresolved(source)
}

/// Lexically normalize a path, resolving `.` and `..` without touching the disk
pub fn standardize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    result.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    result.pop();
                } else if !result.has_root() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Whether a plain filename could escape its directory
pub fn is_traversal_attempt(filename: &str) -> bool {
    filename.contains("..")
        || filename.contains("//")
        || filename.contains('\\')
        || filename.contains('\0')
        || filename.starts_with('/')
}

/// Join `filename` onto `dir` and return it only if it stays inside `dir`
fn contained_join(dir: &Path, filename: &str) -> Option<PathBuf> {
    let joined = standardize(&dir.join(filename));
    if joined.starts_with(dir) && joined != dir {
        Some(joined)
    } else {
        None
    }
}

fn unresolved(filename: &str) -> ImageSource {
    ImageSource::Sidecar {
        filename: filename.to_string(),
        resolved_path: None,
    }
}

fn empty_source(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    ctx.source.is_empty().then(|| unresolved(""))
}

fn remote_url(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    let lower = ctx.source.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return None;
    }
    match Url::parse(ctx.source) {
        Ok(url) if url.has_host() => Some(ImageSource::Remote(url)),
        _ => {
            log::debug!("Ignoring unparseable URL {:?}", ctx.source);
            None
        }
    }
}

fn absolute_path(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    ctx.source
        .starts_with('/')
        .then(|| ImageSource::Absolute(standardize(Path::new(ctx.source))))
}

fn explicit_relative(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    if !(ctx.source.starts_with("./") || ctx.source.starts_with("../")) {
        return None;
    }
    let dir = ctx.document_dir.as_ref()?;
    Some(ImageSource::DocumentRelative(standardize(&dir.join(ctx.source))))
}

fn traversal_guard(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    if is_traversal_attempt(ctx.source) {
        log::debug!("Refusing to resolve traversal attempt {:?}", ctx.source);
        Some(unresolved(ctx.source))
    } else {
        None
    }
}

fn existing_document_relative(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    let dir = ctx.document_dir.as_ref()?;
    let path = contained_join(dir, ctx.source)?;
    path.is_file().then_some(ImageSource::DocumentRelative(path))
}

fn sidecar_manifest(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    let path = ctx.sidecar?.lookup(ctx.source)?;
    Some(ImageSource::Sidecar {
        filename: ctx.source.to_string(),
        resolved_path: Some(path),
    })
}

fn sidecar_direct(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    let dir = standardize(ctx.sidecar?.sidecar_directory()?);
    let path = contained_join(&dir, ctx.source)?;
    path.is_file().then(|| ImageSource::Sidecar {
        filename: ctx.source.to_string(),
        resolved_path: Some(path),
    })
}

fn unverified_document_relative(ctx: &ResolveContext<'_>) -> Option<ImageSource> {
    let dir = ctx.document_dir.as_ref()?;
    let path = contained_join(dir, ctx.source)?;
    Some(ImageSource::DocumentRelative(path))
}
