//! `;`-delimited experiment results.
//!
//! One row per experiment outcome. The files are consumed by external
//! plotting scripts, so the header of each row type is fixed.

use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::Result;

pub const DELIMITER: char = ';';

pub trait ResultRow {
    fn header() -> &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

pub fn format_line(fields: &[String]) -> String {
    let mut line = fields.join(&DELIMITER.to_string());
    line.push('\n');
    line
}

/// Renders a header line followed by `rows`.
pub fn render<R: ResultRow>(rows: &[R]) -> String {
    let header: Vec<String> = R::header().iter().map(|name| name.to_string()).collect();
    let mut out = format_line(&header);
    for row in rows {
        out.push_str(&format_line(&row.fields()));
    }
    out
}

/// Appends rows to a results file, writing the header when the file is new
/// or empty.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    path: PathBuf,
}

impl ResultWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append<R: ResultRow>(&self, rows: &[R]) -> Result<usize> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let needs_header = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let mut out = String::new();
        if needs_header {
            let header: Vec<String> = R::header().iter().map(|name| name.to_string()).collect();
            out.push_str(&format_line(&header));
        }
        for row in rows {
            out.push_str(&format_line(&row.fields()));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(out.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended {} rows to {}", rows.len(), self.path.display());
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(u32, f64);

    impl ResultRow for Pair {
        fn header() -> &'static [&'static str] {
            &["count", "time"]
        }

        fn fields(&self) -> Vec<String> {
            vec![self.0.to_string(), self.1.to_string()]
        }
    }

    #[test]
    fn test_render() {
        let text = render(&[Pair(1, 0.5), Pair(2, 1.25)]);
        assert_eq!(text, "count;time\n1;0.5\n2;1.25\n");
    }

    #[tokio::test]
    async fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("csv").join("pairs.csv"));

        writer.append(&[Pair(1, 0.5)]).await.unwrap();
        writer.append(&[Pair(2, 1.0), Pair(3, 1.5)]).await.unwrap();

        let text = tokio::fs::read_to_string(writer.path()).await.unwrap();
        assert_eq!(text, "count;time\n1;0.5\n2;1\n3;1.5\n");
    }
}
