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

use lepton_util as util;

use crate::util::zip;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[test]
fn zip_unzip() {
	let root = Path::new("target/tmp/zip");
	let _ = fs::remove_dir_all(root);
	fs::create_dir_all(root.join("to_zip/sub")).unwrap();

	write_file(&root.join("to_zip/foo.txt"), b"foo contents");
	write_file(&root.join("to_zip/bar.txt"), b"bar contents");
	write_file(&root.join("to_zip/sub/lorem"), b"lorem ipsum");
	// a file we deliberately do not include in the archive
	write_file(&root.join("to_zip/ignored.txt"), b"should not survive");

	let zip_path = root.join("archive.zip");
	{
		let zip_file = File::create(&zip_path).unwrap();
		zip::create_zip(
			&zip_file,
			&root.join("to_zip"),
			vec![
				PathBuf::from("foo.txt"),
				PathBuf::from("bar.txt"),
				PathBuf::from("sub/lorem"),
			],
		)
		.unwrap();
	}

	assert!(zip_path.exists());

	let dest = root.join("unzipped");
	fs::create_dir_all(&dest).unwrap();
	{
		let zip_file = File::open(&zip_path).unwrap();
		zip::extract_files(
			zip_file,
			&dest,
			vec![
				PathBuf::from("foo.txt"),
				PathBuf::from("bar.txt"),
				PathBuf::from("sub/lorem"),
			],
		)
		.unwrap();
	}

	assert_eq!(fs::read(dest.join("foo.txt")).unwrap(), b"foo contents");
	assert_eq!(fs::read(dest.join("bar.txt")).unwrap(), b"bar contents");
	assert_eq!(fs::read(dest.join("sub/lorem")).unwrap(), b"lorem ipsum");
	assert!(!dest.join("ignored.txt").exists());
}

fn write_file(path: &Path, contents: &[u8]) {
	let mut file = File::create(path).unwrap();
	file.write_all(contents).unwrap();
}
