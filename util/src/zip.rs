// Copyright 2019 The Lepton Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wrappers around the `zip-rs` library to compress and decompress zip
//! archives. Only the explicit list of files passed in ever makes it into
//! or out of an archive; anything else is ignored.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::panic;
use std::path::{Path, PathBuf};

use self::zip_rs::result::{ZipError, ZipResult};
use self::zip_rs::write::FileOptions;
use zip as zip_rs;

/// Create a zip archive from source dir and list of relative file paths.
/// Permissions are set to 644 by default.
pub fn create_zip(dst_file: &File, src_dir: &Path, files: Vec<PathBuf>) -> io::Result<()> {
	let mut writer = {
		let zip = zip_rs::ZipWriter::new(dst_file);
		BufWriter::new(zip)
	};

	let options = FileOptions::default()
		.compression_method(zip_rs::CompressionMethod::Stored)
		.unix_permissions(0o644);

	for x in &files {
		let file_path = src_dir.join(x);
		if let Ok(file) = File::open(file_path.clone()) {
			info!("compress: {:?} -> {:?}", file_path, x);
			writer.get_mut().start_file_from_path(x, options)?;
			io::copy(&mut BufReader::new(file), &mut writer)?;
			// Flush the BufWriter after each file so we start then next one correctly.
			writer.flush()?;
		}
	}

	writer.get_mut().finish()?;
	dst_file.sync_all()?;
	Ok(())
}

/// Extract a set of files from the provided zip archive.
pub fn extract_files(from_archive: File, dest: &Path, files: Vec<PathBuf>) -> io::Result<()> {
	let dest: PathBuf = PathBuf::from(dest);
	let files: Vec<_> = files.iter().cloned().collect();
	let res = panic::catch_unwind(move || -> ZipResult<()> {
		let mut archive = zip_rs::ZipArchive::new(from_archive)?;
		for x in files {
			if let Some(file_internal_path) = x.to_str() {
				let mut file = archive.by_name(file_internal_path)?;
				let path = dest.join(file.sanitized_name());
				let parent_dir = path.parent().ok_or_else(|| {
					ZipError::Io(io::Error::new(
						io::ErrorKind::Other,
						"can't find parent dir",
					))
				})?;
				fs::create_dir_all(&parent_dir)?;
				let outfile = File::create(&path)?;
				io::copy(&mut file, &mut BufWriter::new(outfile))?;

				debug!("extract_files: {:?}", path);

				// Set file permissions to "644" (Unix only).
				#[cfg(unix)]
				{
					use std::os::unix::fs::PermissionsExt;
					let mode = PermissionsExt::from_mode(0o644);
					fs::set_permissions(&path, mode)?;
				}
			}
		}
		Ok(())
	});

	// If the closure panicked or errored we failed to extract the files.
	match res {
		Ok(Ok(())) => Ok(()),
		Ok(Err(e)) => Err(io::Error::new(
			io::ErrorKind::Other,
			format!("failed to extract files from zip: {}", e),
		)),
		Err(_) => Err(io::Error::new(
			io::ErrorKind::Other,
			"failed to extract files from zip (panic)",
		)),
	}
}
