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

//! File util

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Delete a directory or file
pub fn delete(path_buf: PathBuf) -> io::Result<()> {
	if path_buf.is_dir() {
		fs::remove_dir_all(path_buf)
	} else if path_buf.is_file() {
		fs::remove_file(path_buf)
	} else {
		Ok(())
	}
}

/// Copy directory, create destination if needed
pub fn copy_dir_to(src: &Path, dst: &Path) -> io::Result<u64> {
	let mut counter = 0u64;
	if !dst.is_dir() {
		fs::create_dir(dst)?
	}

	for entry_result in src.read_dir()? {
		let entry = entry_result?;
		let file_type = entry.file_type()?;
		let count = copy_to(&entry.path(), &file_type, &dst.join(entry.file_name()))?;
		counter += count;
	}
	Ok(counter)
}

/// List directory
pub fn list_files(path: &Path) -> Vec<PathBuf> {
	WalkDir::new(path)
		.sort_by(|a, b| a.path().cmp(b.path()))
		.min_depth(1)
		.into_iter()
		.filter_map(|x| x.ok())
		.filter(|x| x.file_type().is_file())
		.filter_map(|x| x.path().strip_prefix(path).map(|x| x.to_path_buf()).ok())
		.collect()
}

fn copy_to(src: &Path, src_type: &fs::FileType, dst: &Path) -> io::Result<u64> {
	if src_type.is_file() {
		fs::copy(src, dst)
	} else if src_type.is_dir() {
		copy_dir_to(src, dst)
	} else {
		return Err(io::Error::new(
			io::ErrorKind::Other,
			format!("Could not copy: {}", src.display()),
		));
	}
}

/// Save a writer closure to a file via a temp file, then rename. Protects
/// against a partially written file if the process dies mid-write.
pub fn save_via_temp_file<F, P, E>(path: P, temp_suffix: E, write_fn: F) -> io::Result<()>
where
	F: Fn(Box<dyn Write>) -> io::Result<()>,
	P: AsRef<Path>,
	E: AsRef<Path>,
{
	let temp_suffix = temp_suffix.as_ref();
	assert!(!temp_suffix.as_os_str().is_empty());

	let original = path.as_ref();
	let mut _original = original.as_os_str().to_os_string();
	_original.push(temp_suffix);
	// Write temporary file
	let temp_path = Path::new(&_original);
	if temp_path.exists() {
		fs::remove_file(&temp_path)?;
	}

	let file = File::create(&temp_path)?;
	write_fn(Box::new(file))?;

	// Move temporary file into original
	if original.exists() {
		fs::remove_file(&original)?;
	}

	fs::rename(&temp_path, &original)?;

	Ok(())
}

/// Read a file to a vec of bytes.
pub fn read_to_vec<P: AsRef<Path>>(path: P) -> io::Result<Vec<u8>> {
	let mut file = BufReader::new(File::open(path)?);
	let mut buf = vec![];
	file.read_to_end(&mut buf)?;
	Ok(buf)
}

/// Write a slice of bytes to a file, replacing any previous content.
pub fn write_all<P: AsRef<Path>>(path: P, buf: &[u8]) -> io::Result<()> {
	let mut file = BufWriter::new(File::create(path)?);
	file.write_all(buf)?;
	file.flush()
}
