//! OPSI package assembly and inspection
//!
//! An OPSI package is an uncompressed tar holding two gzip-compressed tars:
//!
//! ```text
//! <product_id>_<product_version>-<package_version>.opsi
//! ├── OPSI.tar.gz         control (resolved) + files of the OPSI directory
//! └── CLIENT_DATA.tar.gz  files of the CLIENT_DATA directory
//! ```
//!
//! Each tar and gzip step starts from and ends in the filesystem. The tar
//! writer may buffer until it is finished, so it is never stacked directly on
//! top of a gzip writer.
//!
//! OPSI uses a flat structure: input directories are walked recursively but
//! every file is stored under its base name only.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

use crate::control;
use crate::error::{CoreError, Result};
use crate::metadata::Metadata;

/// Name of the synthetic control file entry inside `OPSI.tar.gz`
pub const CONTROL_ENTRY: &str = "control";

/// Name of the compressed OPSI archive inside the package
pub const OPSI_ARCHIVE: &str = "OPSI.tar.gz";

/// Name of the compressed client data archive inside the package
pub const CLIENT_DATA_ARCHIVE: &str = "CLIENT_DATA.tar.gz";

const OPSI_TAR: &str = "OPSI.tar";
const CLIENT_DATA_TAR: &str = "CLIENT_DATA.tar";
const CONTROL_MODE: u32 = 0o600;

/// Steps of the assembly pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStep {
    OpsiArchive,
    OpsiCompress,
    DataArchive,
    DataCompress,
    Package,
}

impl fmt::Display for AssemblyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OpsiArchive => "building OPSI archive",
            Self::OpsiCompress => "compressing OPSI archive",
            Self::DataArchive => "building CLIENT_DATA archive",
            Self::DataCompress => "compressing CLIENT_DATA archive",
            Self::Package => "building OPSI package",
        };
        f.write_str(msg)
    }
}

/// Sizes observed while compressing one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    /// Bytes read from the uncompressed input
    pub original: u64,
    /// Size of the compressed output on disk
    pub compressed: u64,
}

impl CompressionStats {
    /// Compression factor (`original / compressed`), 1.0 for empty output
    pub fn ratio(&self) -> f64 {
        if self.compressed == 0 {
            1.0
        } else {
            self.original as f64 / self.compressed as f64
        }
    }
}

/// Build the OPSI package
///
/// Intermediate archives are written to `work_dir`, which is owned by the
/// caller. The package is created in `dest_dir` and its path returned.
///
/// Metadata is parsed from `control` only once both compressed archives
/// exist, and a missing filename key fails before the package file is
/// created. A failure while writing the package itself may leave a partial
/// file behind.
pub fn assemble(
    control: &[u8],
    opsi_dir: &Path,
    data_dir: &Path,
    dest_dir: &Path,
    work_dir: &Path,
) -> Result<PathBuf> {
    // OPSI.tar
    let opsi_tar = work_dir.join(OPSI_TAR);
    tracing::info!("creating {}", opsi_tar.display());
    build_flat_archive(&opsi_tar, opsi_dir, Some(control), AssemblyStep::OpsiArchive)?;

    // OPSI.tar.gz
    let opsi_tar_gz = work_dir.join(OPSI_ARCHIVE);
    compress(&opsi_tar, &opsi_tar_gz, AssemblyStep::OpsiCompress)?;

    // CLIENT_DATA.tar
    let data_tar = work_dir.join(CLIENT_DATA_TAR);
    tracing::info!("creating {}", data_tar.display());
    build_flat_archive(&data_tar, data_dir, None, AssemblyStep::DataArchive)?;

    // CLIENT_DATA.tar.gz
    let data_tar_gz = work_dir.join(CLIENT_DATA_ARCHIVE);
    compress(&data_tar, &data_tar_gz, AssemblyStep::DataCompress)?;

    // final package
    let metadata = control::parse_reader(control)?;
    let package = dest_dir.join(metadata.package_filename()?);
    build_package(
        &package,
        &[
            (opsi_tar_gz.as_path(), OPSI_ARCHIVE),
            (data_tar_gz.as_path(), CLIENT_DATA_ARCHIVE),
        ],
    )?;

    tracing::info!("created OPSI package {}", package.display());
    Ok(package)
}

/// Write a tar of every file below `dir`, stored by base name
///
/// With `control` set, a synthetic `control` entry holding those bytes comes
/// first and on-disk files named `control` are left out.
fn build_flat_archive(
    output: &Path,
    dir: &Path,
    control: Option<&[u8]>,
    step: AssemblyStep,
) -> Result<()> {
    let file = File::create(output).map_err(|e| CoreError::assembly(step, output, e))?;
    let mut builder = Builder::new(file);

    if let Some(control) = control {
        append_control(&mut builder, control).map_err(|e| CoreError::assembly(step, output, e))?;
    }

    let mut seen = HashSet::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            CoreError::assembly(step, path, io::Error::from(e))
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name();
        if control.is_some() && name == CONTROL_ENTRY {
            tracing::info!("skipping control file {}", entry.path().display());
            continue;
        }
        if !seen.insert(name.to_os_string()) {
            tracing::warn!(
                "duplicate file name {} in flat archive {}",
                entry.path().display(),
                output.display()
            );
        }

        tracing::debug!("adding {}", entry.path().display());
        builder
            .append_path_with_name(entry.path(), name)
            .map_err(|e| CoreError::assembly(step, entry.path(), e))?;
    }

    let mut file = builder
        .into_inner()
        .map_err(|e| CoreError::assembly(step, output, e))?;
    file.flush().map_err(|e| CoreError::assembly(step, output, e))?;
    Ok(())
}

/// Append the resolved control file, which has no file on disk
fn append_control<W: Write>(builder: &mut Builder<W>, control: &[u8]) -> io::Result<()> {
    tracing::info!("writing {} bytes control file to tar", control.len());

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(control.len() as u64);
    header.set_mode(CONTROL_MODE);
    header.set_mtime(chrono::Utc::now().timestamp().try_into().unwrap_or(0));
    header.set_cksum();

    builder.append_data(&mut header, CONTROL_ENTRY, control)
}

/// Gzip `from` into `into`
fn compress(from: &Path, into: &Path, step: AssemblyStep) -> Result<CompressionStats> {
    tracing::info!("compressing {} from {}", into.display(), from.display());

    let mut source = File::open(from).map_err(|e| CoreError::assembly(step, from, e))?;
    let target = File::create(into).map_err(|e| CoreError::assembly(step, into, e))?;

    let mut encoder = GzEncoder::new(target, Compression::default());
    let original =
        io::copy(&mut source, &mut encoder).map_err(|e| CoreError::assembly(step, into, e))?;
    let mut target = encoder
        .finish()
        .map_err(|e| CoreError::assembly(step, into, e))?;
    target
        .flush()
        .map_err(|e| CoreError::assembly(step, into, e))?;
    drop(target);

    let compressed = fs::metadata(into)
        .map_err(|e| CoreError::assembly(step, into, e))?
        .len();

    let stats = CompressionStats {
        original,
        compressed,
    };
    tracing::info!("compress factor {:.1}", stats.ratio());
    Ok(stats)
}

/// Write the final container holding the compressed archives
fn build_package(package: &Path, members: &[(&Path, &str)]) -> Result<()> {
    let step = AssemblyStep::Package;
    let file = File::create(package).map_err(|e| CoreError::assembly(step, package, e))?;
    let mut builder = Builder::new(file);

    for (path, name) in members {
        builder
            .append_path_with_name(path, name)
            .map_err(|e| CoreError::assembly(step, *path, e))?;
    }

    let mut file = builder
        .into_inner()
        .map_err(|e| CoreError::assembly(step, package, e))?;
    file.flush()
        .map_err(|e| CoreError::assembly(step, package, e))?;
    Ok(())
}

/// Information about a file in an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    /// Path within the archive
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Contents of a built package, read back for verification
#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    pub path: PathBuf,
    /// Entries of the outer container
    pub entries: Vec<ArchiveEntry>,
    /// Entries of `OPSI.tar.gz`
    pub opsi: Vec<ArchiveEntry>,
    /// Entries of `CLIENT_DATA.tar.gz`
    pub client_data: Vec<ArchiveEntry>,
    /// The embedded control file, non UTF-8 bytes replaced
    pub control: String,
    /// Metadata parsed from the embedded control file
    pub metadata: Metadata,
}

/// List the entries of an uncompressed tar
pub fn list_entries(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    Ok(entries_of(File::open(archive_path)?)?)
}

/// List the entries of a `.tar.gz`
pub fn list_gz_entries(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    Ok(entries_of(GzDecoder::new(File::open(archive_path)?))?)
}

/// Read a file from an uncompressed tar
pub fn read_entry(archive_path: &Path, name: &str) -> Result<Vec<u8>> {
    find_entry(File::open(archive_path)?, name)?.ok_or_else(|| not_found(archive_path, name))
}

/// Read a file from a `.tar.gz`
pub fn read_gz_entry(archive_path: &Path, name: &str) -> Result<Vec<u8>> {
    find_entry(GzDecoder::new(File::open(archive_path)?), name)?
        .ok_or_else(|| not_found(archive_path, name))
}

/// Read a package back: both inner archives and the embedded control file
pub fn inspect_package(package: &Path) -> Result<PackageInfo> {
    let entries = list_entries(package)?;
    let opsi = read_entry(package, OPSI_ARCHIVE)?;
    let client_data = read_entry(package, CLIENT_DATA_ARCHIVE)?;

    let control_bytes = find_entry(GzDecoder::new(opsi.as_slice()), CONTROL_ENTRY)?
        .ok_or_else(|| not_found(package, &format!("{OPSI_ARCHIVE}/{CONTROL_ENTRY}")))?;
    // control files may be in any ASCII-compatible encoding
    let control = String::from_utf8_lossy(&control_bytes).into_owned();
    let metadata = control::parse(&control);

    Ok(PackageInfo {
        path: package.to_path_buf(),
        entries,
        opsi: entries_of(GzDecoder::new(opsi.as_slice()))?,
        client_data: entries_of(GzDecoder::new(client_data.as_slice()))?,
        control,
        metadata,
    })
}

fn entries_of<R: Read>(reader: R) -> io::Result<Vec<ArchiveEntry>> {
    let mut archive = Archive::new(reader);
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        entries.push(ArchiveEntry {
            path: entry.path()?.to_string_lossy().to_string(),
            size: header.size()?,
            mode: header.mode()?,
            is_dir: header.entry_type().is_dir(),
        });
    }

    Ok(entries)
}

fn find_entry<R: Read>(reader: R, name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == name {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(Some(content));
        }
    }

    Ok(None)
}

fn not_found(archive: &Path, entry: &str) -> CoreError {
    CoreError::EntryNotFound {
        archive: archive.to_path_buf(),
        entry: entry.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONTROL: &str = "\
[Package]
version: 4

[Product]
id: p1
version: 1.2.3
";

    struct Fixture {
        temp: TempDir,
        opsi: PathBuf,
        data: PathBuf,
        dest: PathBuf,
        work: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let opsi = temp.path().join("OPSI");
        let data = temp.path().join("CLIENT_DATA");
        let dest = temp.path().join("out");
        let work = temp.path().join("work");
        for dir in [&opsi, &data, &dest, &work] {
            fs::create_dir_all(dir).unwrap();
        }
        // unresolved copy on disk, must not end up in the archive
        fs::write(opsi.join("control"), "[Product]\nversion: {{.product_version}}\n").unwrap();
        fs::write(opsi.join("setup.opsiscript"), "Message \"installing\"\n").unwrap();

        Fixture {
            temp,
            opsi,
            data,
            dest,
            work,
        }
    }

    fn names(entries: &[ArchiveEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_assemble_package() {
        let f = fixture();
        let package = assemble(CONTROL.as_bytes(), &f.opsi, &f.data, &f.dest, &f.work).unwrap();

        assert_eq!(package, f.dest.join("p1_1.2.3-4.opsi"));
        assert!(package.exists());

        let info = inspect_package(&package).unwrap();
        assert_eq!(names(&info.entries), vec![OPSI_ARCHIVE, CLIENT_DATA_ARCHIVE]);
        assert_eq!(names(&info.opsi), vec![CONTROL_ENTRY, "setup.opsiscript"]);
        assert!(info.client_data.is_empty());
        assert_eq!(info.control, CONTROL);
        assert_eq!(info.metadata.get("product_id"), Some("p1"));
    }

    #[test]
    fn test_inspect_latin1_control() {
        let f = fixture();
        let control = b"[Package]\nversion: 1\n[Product]\nid: p1\nversion: 2\ndescription: M\xFCller\n";
        let package = assemble(control, &f.opsi, &f.data, &f.dest, &f.work).unwrap();

        let embedded = read_gz_entry(&f.work.join(OPSI_ARCHIVE), CONTROL_ENTRY).unwrap();
        assert_eq!(embedded, control);

        let info = inspect_package(&package).unwrap();
        assert_eq!(info.metadata.get("product_id"), Some("p1"));
        assert_eq!(info.metadata.get("product_description"), Some("M\u{FFFD}ller"));
    }

    #[test]
    fn test_control_entry_header() {
        let f = fixture();
        assemble(CONTROL.as_bytes(), &f.opsi, &f.data, &f.dest, &f.work).unwrap();

        let entries = list_gz_entries(&f.work.join(OPSI_ARCHIVE)).unwrap();
        let control = entries.iter().find(|e| e.path == CONTROL_ENTRY).unwrap();
        assert_eq!(control.mode, CONTROL_MODE);
        assert_eq!(control.size, CONTROL.len() as u64);

        let content = read_gz_entry(&f.work.join(OPSI_ARCHIVE), CONTROL_ENTRY).unwrap();
        assert_eq!(content, CONTROL.as_bytes());
    }

    #[test]
    fn test_nested_files_are_stored_flat() {
        let f = fixture();
        let nested = f.data.join("files").join("deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("payload.bin"), [0u8, 1, 2, 3]).unwrap();
        fs::write(f.data.join("setup.exe"), b"MZ").unwrap();
        // only the OPSI archive drops files named control
        fs::write(f.data.join("control"), b"data").unwrap();

        assemble(CONTROL.as_bytes(), &f.opsi, &f.data, &f.dest, &f.work).unwrap();

        let entries = list_gz_entries(&f.work.join(CLIENT_DATA_ARCHIVE)).unwrap();
        let mut paths = names(&entries);
        paths.sort();
        assert_eq!(paths, vec!["control", "payload.bin", "setup.exe"]);
        assert!(entries.iter().all(|e| !e.is_dir));

        let payload = read_gz_entry(&f.work.join(CLIENT_DATA_ARCHIVE), "payload.bin").unwrap();
        assert_eq!(payload, vec![0u8, 1, 2, 3]);
    }

    #[test]
    fn test_missing_metadata_creates_no_package() {
        let f = fixture();
        let control = "[Product]\nid: p1\nversion: 1.2.3\n";

        let err = assemble(control.as_bytes(), &f.opsi, &f.data, &f.dest, &f.work).unwrap_err();
        assert!(matches!(err, CoreError::MissingMetadata { ref key } if key == "package_version"));
        assert_eq!(fs::read_dir(&f.dest).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_input_dir_names_step() {
        let f = fixture();
        let missing = f.temp.path().join("nope");

        let err = assemble(CONTROL.as_bytes(), &f.opsi, &missing, &f.dest, &f.work).unwrap_err();
        match err {
            CoreError::Assembly { step, path, .. } => {
                assert_eq!(step, AssemblyStep::DataArchive);
                assert_eq!(path, missing);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_work_dir_fails_first_step() {
        let f = fixture();
        let work = f.temp.path().join("gone");

        let err = assemble(CONTROL.as_bytes(), &f.opsi, &f.data, &f.dest, &work).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Assembly {
                step: AssemblyStep::OpsiArchive,
                ..
            }
        ));
    }

    #[test]
    fn test_compress_reports_sizes() {
        let f = fixture();
        let from = f.work.join("plain");
        fs::write(&from, "a".repeat(10_000)).unwrap();

        let stats = compress(&from, &f.work.join("plain.gz"), AssemblyStep::OpsiCompress).unwrap();
        assert_eq!(stats.original, 10_000);
        assert!(stats.compressed > 0);
        assert!(stats.ratio() > 1.0);
    }

    #[test]
    fn test_ratio_of_empty_output() {
        let stats = CompressionStats {
            original: 0,
            compressed: 0,
        };
        assert_eq!(stats.ratio(), 1.0);

        let stats = CompressionStats {
            original: 512,
            compressed: 0,
        };
        assert_eq!(stats.ratio(), 1.0);
    }

    #[test]
    fn test_read_missing_entry() {
        let f = fixture();
        let package = assemble(CONTROL.as_bytes(), &f.opsi, &f.data, &f.dest, &f.work).unwrap();

        let err = read_entry(&package, "nothing").unwrap_err();
        assert!(matches!(err, CoreError::EntryNotFound { ref entry, .. } if entry == "nothing"));
    }

    #[test]
    fn test_assembly_error_message() {
        let err = CoreError::assembly(
            AssemblyStep::Package,
            "/tmp/out.opsi",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "building OPSI package failed for /tmp/out.opsi: denied"
        );
    }
}
