//! The storage walkthrough served at `/`.
//!
//! Writes a file, reads it back, stats it, creates a handful of files and
//! lists them flat and in directory mode, then deletes everything it
//! created. Output is plain text meant for a browser.

use std::io::SeekFrom;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use tracing::{error, info, warn};

use bucketdemo_common::{ListOptions, RetryParams, Storage, StorageError, WriteOptions};

use crate::state::AppState;

const LIST_PAGE_SIZE: usize = 1;
const TAIL_BYTES: i64 = 1024;
const LISTBUCKET_FILES: [&str; 6] = ["/foo1", "/foo2", "/bar", "/bar/1", "/bar/2", "/boo/"];

pub async fn run_demo(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bucket_name = state
        .env
        .var("BUCKET_NAME")
        .unwrap_or_else(|| state.default_bucket.clone());
    let version = state
        .env
        .var("CURRENT_VERSION_ID")
        .unwrap_or_else(|| "unknown".to_string());

    let body = Demo::new(&state.storage).run(&bucket_name, &version).await;
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

struct Demo<'a> {
    storage: &'a Storage,
    out: String,
    tmp_files: Vec<String>,
}

impl<'a> Demo<'a> {
    fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            out: String::new(),
            tmp_files: Vec::new(),
        }
    }

    fn write(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
    }

    async fn run(mut self, bucket_name: &str, version: &str) -> String {
        info!(bucket = %bucket_name, "Running storage demo");
        self.write(format!("Demo GCS Application running from Version: {}\n", version));
        self.write(format!("Using bucket name: {}\n\n", bucket_name));

        let bucket = format!("/{}", bucket_name);
        let result = self.steps(&bucket).await;
        self.delete_files().await;

        match result {
            Ok(()) => self.write("\n\nThe demo ran successfully!\n"),
            Err(e) => {
                error!(error = %e, "Storage demo failed");
                self.write(
                    "\n\nThere was an error running the demo! \
                     Please check the logs for more details.\n",
                );
            }
        }
        self.out
    }

    async fn steps(&mut self, bucket: &str) -> Result<(), StorageError> {
        let filename = format!("{}/demo-testfile", bucket);

        self.create_file(&filename).await?;
        self.write("\n\n");

        self.read_file(&filename).await?;
        self.write("\n\n");

        self.stat_file(&filename).await?;
        self.write("\n\n");

        self.create_files_for_list_bucket(bucket).await?;
        self.write("\n\n");

        self.list_bucket(bucket).await?;
        self.write("\n\n");

        self.list_bucket_directory_mode(bucket).await?;
        self.write("\n\n");
        Ok(())
    }

    /// The retry params passed here override the defaults for this handle only.
    async fn create_file(&mut self, filename: &str) -> Result<(), StorageError> {
        self.write(format!("Creating file {}\n", filename));

        let write_retry = RetryParams::new().with_backoff_factor(1.1);
        let options = WriteOptions::new()
            .with_content_type("text/plain")
            .with_metadata("x-goog-meta-foo", "foo")
            .with_metadata("x-goog-meta-bar", "bar");
        let mut file = self.storage.open_write(filename, options, Some(write_retry))?;
        file.write("abcde\n");
        file.write("f".repeat(1024 * 4) + "\n");
        file.close().await?;

        self.tmp_files.push(filename.to_string());
        Ok(())
    }

    async fn read_file(&mut self, filename: &str) -> Result<(), StorageError> {
        self.write("Abbreviated file content (first line and last 1K):\n");

        let mut file = self.storage.open_read(filename, None).await?;
        let first_line = file.readline().await?;
        self.write(String::from_utf8_lossy(&first_line));
        file.seek(SeekFrom::End(-TAIL_BYTES))?;
        let tail = file.read_to_end().await?;
        self.write(String::from_utf8_lossy(&tail));
        Ok(())
    }

    async fn stat_file(&mut self, filename: &str) -> Result<(), StorageError> {
        self.write("File stat:\n");
        let stat = self.storage.stat(filename).await?;
        self.write(stat.to_string());
        Ok(())
    }

    async fn create_files_for_list_bucket(&mut self, bucket: &str) -> Result<(), StorageError> {
        self.write("Creating more files for listbucket...\n");
        for name in LISTBUCKET_FILES {
            self.create_file(&format!("{}{}", bucket, name)).await?;
        }
        Ok(())
    }

    async fn list_bucket(&mut self, bucket: &str) -> Result<(), StorageError> {
        self.write("Listbucket result:\n");

        let options = ListOptions::new(format!("{}/foo", bucket)).with_page_size(LIST_PAGE_SIZE);
        let mut stats = self.storage.listbucket(options)?;
        while let Some(stat) = stats.next_stat().await {
            self.write(format!("{}\n", stat?));
        }
        Ok(())
    }

    async fn list_bucket_directory_mode(&mut self, bucket: &str) -> Result<(), StorageError> {
        self.write("Listbucket directory mode result:\n");

        let options = ListOptions::new(format!("{}/b", bucket)).with_delimiter("/");
        let mut stats = self.storage.listbucket(options)?;
        while let Some(stat) = stats.next_stat().await {
            let stat = stat?;
            self.write(format!("{}\n", stat));
            if stat.is_dir {
                let options = ListOptions::new(stat.filename.clone()).with_delimiter("/");
                let mut subdir = self.storage.listbucket(options)?;
                while let Some(sub) = subdir.next_stat().await {
                    self.write(format!("  {}\n", sub?));
                }
            }
        }
        Ok(())
    }

    async fn delete_files(&mut self) {
        self.write("Deleting files...\n");
        for filename in std::mem::take(&mut self.tmp_files) {
            self.write(format!("Deleting file {}\n", filename));
            match self.storage.delete(&filename).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => warn!(file = %filename, error = %e, "Failed to delete demo file"),
            }
        }
    }
}
