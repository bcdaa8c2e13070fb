//! Built-in datasets for easy testing and experimentation.
use std::env;
use std::fs::{create_dir_all, rename, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::info;

use super::data::RatingData;

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// Can't find the home directory.
    #[fail(display = "Cannot find home directory.")]
    NoHomeDir,
    /// The server refused the download.
    #[fail(display = "Download of {} failed with status {}.", _0, _1)]
    Download(String, u16),
}

fn create_data_dir() -> Result<PathBuf, failure::Error> {
    let path = env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(DatasetError::NoHomeDir)?
        .join(".crossfold");

    if !path.exists() {
        create_dir_all(&path)?;
    }

    Ok(path)
}

fn download(url: &str, dest_filename: &Path, delimiter: u8) -> Result<RatingData, failure::Error> {
    let data_dir = create_data_dir()?;
    let desired_filename = data_dir.join(dest_filename);
    let temp_filename = desired_filename.with_extension("part");

    if !desired_filename.exists() {
        info!(url, "downloading dataset");

        let mut response = reqwest::blocking::get(url)?;
        if !response.status().is_success() {
            return Err(DatasetError::Download(url.to_owned(), response.status().as_u16()).into());
        }

        let file = File::create(&temp_filename)?;
        let mut writer = BufWriter::new(file);
        response.copy_to(&mut writer)?;
        drop(writer);

        rename(temp_filename, &desired_filename)?;
    }

    Ok(RatingData::from_path(desired_filename, delimiter)?)
}

/// Download the Movielens 100K dataset and return it.
///
/// The data is stored in `~/.crossfold/`. Every rating carries its timestamp,
/// so the data suits both split modes.
pub fn download_movielens_100k() -> Result<RatingData, failure::Error> {
    download(
        "https://files.grouplens.org/datasets/movielens/ml-100k/u.data",
        Path::new("movielens_100k.tsv"),
        b'\t',
    )
}
