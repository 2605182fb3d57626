//! Reading extension resources
//!
//! An extension origin is a URL: `file:///dir/arbor-extension.yaml` for an
//! unpacked extension, or `jar:file:///lib/x.jar!/arbor-extension.yaml` for a
//! descriptor inside a zip archive. Relative references resolve against the
//! directory holding the descriptor.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Opens byte streams named relative to an extension origin
pub trait ResourceLoader {
    /// The origin this loader resolves against
    fn origin(&self) -> &Url;

    /// Open a resource by absolute `file:` URL, absolute path or origin-relative reference
    fn open(&self, reference: &str) -> Result<Box<dyn Read>>;

    /// Read a resource fully
    fn read(&self, reference: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open(reference)?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {} from {}", reference, self.origin()))?;
        Ok(bytes)
    }

    /// Read a resource as UTF-8 text
    fn read_text(&self, reference: &str) -> Result<String> {
        let bytes = self.read(reference)?;
        String::from_utf8(bytes)
            .map_err(|_| anyhow!("{} from {} is not valid UTF-8", reference, self.origin()))
    }
}

/// Builds a loader for an origin URL
pub type LoaderFactory = fn(&Url) -> Result<Box<dyn ResourceLoader>>;

/// Maps URL schemes to loader factories
///
/// Unknown schemes are rejected rather than guessed at.
pub struct LoaderRegistry {
    factories: HashMap<String, LoaderFactory>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("file", FileResourceLoader::create);
        registry.register("jar", JarResourceLoader::create);
        registry
    }
}

impl LoaderRegistry {
    pub fn register(&mut self, scheme: &str, factory: LoaderFactory) {
        self.factories.insert(scheme.to_string(), factory);
    }

    /// Create the loader for an origin
    pub fn loader_for(&self, origin: &Url) -> Result<Box<dyn ResourceLoader>> {
        let factory = self
            .factories
            .get(origin.scheme())
            .ok_or_else(|| anyhow!("No resource loader registered for scheme '{}'", origin.scheme()))?;
        factory(origin)
    }

    /// Parse and create the loader for an origin string
    pub fn loader_for_str(&self, origin: &str) -> Result<Box<dyn ResourceLoader>> {
        let url = Url::parse(origin).with_context(|| format!("Invalid origin URL '{}'", origin))?;
        self.loader_for(&url)
    }
}

/// Build the origin URL for a descriptor file on disk
pub fn file_origin(path: &Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|_| anyhow!("Cannot build a file URL for {}", path.display()))
}

/// Build the origin URL for a descriptor entry inside an archive
pub fn jar_origin(archive: &Path, entry: &str) -> Result<Url> {
    let archive_url = file_origin(archive)?;
    let raw = format!("jar:{}!/{}", archive_url, entry.trim_start_matches('/'));
    Url::parse(&raw).with_context(|| format!("Invalid archive URL '{}'", raw))
}

/// Split a `jar:` URL into the archive path and entry name
pub fn split_jar_url(url: &Url) -> Result<(PathBuf, String)> {
    let (archive, entry) = url
        .path()
        .split_once("!/")
        .ok_or_else(|| anyhow!("Archive URL '{}' has no '!/' entry separator", url))?;
    let archive_url =
        Url::parse(archive).with_context(|| format!("Invalid archive location in '{}'", url))?;
    let path = archive_url
        .to_file_path()
        .map_err(|_| anyhow!("Archive location '{}' is not a local file", archive_url))?;
    Ok((path, entry.to_string()))
}

/// Open an absolute reference directly, if the reference is absolute
fn open_absolute(reference: &str) -> Option<Result<Box<dyn Read>>> {
    let path = if reference.starts_with("file:") {
        match Url::parse(reference)
            .ok()
            .and_then(|u| u.to_file_path().ok())
        {
            Some(path) => path,
            None => return Some(Err(anyhow!("Invalid file URL '{}'", reference))),
        }
    } else if Path::new(reference).is_absolute() {
        PathBuf::from(reference)
    } else {
        return None;
    };
    Some(
        File::open(&path)
            .map(|f| Box::new(f) as Box<dyn Read>)
            .with_context(|| format!("Failed to open {}", path.display())),
    )
}

/// Loader for extensions unpacked on the filesystem
pub struct FileResourceLoader {
    origin: Url,
    base_dir: PathBuf,
}

impl FileResourceLoader {
    pub fn create(origin: &Url) -> Result<Box<dyn ResourceLoader>> {
        let descriptor = origin
            .to_file_path()
            .map_err(|_| anyhow!("Origin '{}' is not a local file", origin))?;
        let base_dir = descriptor
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Origin '{}' has no parent directory", origin))?;
        Ok(Box::new(Self {
            origin: origin.clone(),
            base_dir,
        }))
    }
}

impl ResourceLoader for FileResourceLoader {
    fn origin(&self) -> &Url {
        &self.origin
    }

    fn open(&self, reference: &str) -> Result<Box<dyn Read>> {
        if let Some(result) = open_absolute(reference) {
            return result;
        }
        let path = self.base_dir.join(reference);
        debug!("Opening resource {}", path.display());
        let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Box::new(file))
    }
}

/// Loader for extensions packaged as zip/jar archives
pub struct JarResourceLoader {
    origin: Url,
    archive: PathBuf,
    base_entry: String,
}

impl JarResourceLoader {
    pub fn create(origin: &Url) -> Result<Box<dyn ResourceLoader>> {
        let (archive, entry) = split_jar_url(origin)?;
        let base_entry = match entry.rfind('/') {
            Some(pos) => entry[..pos + 1].to_string(),
            None => String::new(),
        };
        Ok(Box::new(Self {
            origin: origin.clone(),
            archive,
            base_entry,
        }))
    }

    fn entry_name(&self, reference: &str) -> Result<String> {
        let mut parts: Vec<&str> = self.base_entry.split('/').filter(|s| !s.is_empty()).collect();
        for segment in reference.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        bail!("Reference '{}' escapes archive {}", reference, self.archive.display());
                    }
                }
                other => parts.push(other),
            }
        }
        Ok(parts.join("/"))
    }
}

impl ResourceLoader for JarResourceLoader {
    fn origin(&self) -> &Url {
        &self.origin
    }

    fn open(&self, reference: &str) -> Result<Box<dyn Read>> {
        if let Some(result) = open_absolute(reference) {
            return result;
        }
        let entry = self.entry_name(reference)?;
        debug!("Opening archive entry {}!/{}", self.archive.display(), entry);
        let file = File::open(&self.archive)
            .with_context(|| format!("Failed to open archive {}", self.archive.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read archive {}", self.archive.display()))?;
        let mut zipped = archive
            .by_name(&entry)
            .with_context(|| format!("Entry '{}' not found in {}", entry, self.archive.display()))?;
        let mut bytes = Vec::new();
        zipped.read_to_end(&mut bytes)?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}
