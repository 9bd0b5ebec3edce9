use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use ustar::{
    fs::{Filesystem, LocalFs},
    header::Header,
    stream::{decode_into, EntrySink},
    ArchiveBuilder, Content, EntryDescriptor, EntryKind, EntryMetadata, ExtractOptions,
    SerializeOptions,
};

/// ustarctl
#[derive(Debug, Parser)]
#[clap(name = "ustarctl", version)]
pub struct App {
    /// Log more (repeat for trace output)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an archive from files and directories
    Create {
        /// Archive to write, `-` for stdout
        #[clap(short = 'f', long = "file")]
        file: PathBuf,
        #[clap(short = 'z', long)]
        gzip: bool,
        /// Resolve paths relative to this directory
        #[clap(short = 'C', long = "directory", default_value = ".")]
        directory: PathBuf,
        #[clap(required = true)]
        paths: Vec<String>,
    },
    /// List the entries of an archive
    List {
        /// Archive to read, `-` for stdin
        #[clap(short = 'f', long = "file")]
        file: PathBuf,
        #[clap(short = 'z', long)]
        gzip: bool,
    },
    /// Extract an archive to a directory
    Extract {
        /// Archive to read, `-` for stdin
        #[clap(short = 'f', long = "file")]
        file: PathBuf,
        #[clap(short = 'z', long)]
        gzip: bool,
        #[clap(short = 'C', long = "directory", default_value = ".")]
        directory: PathBuf,
    },
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

async fn open_input(path: &Path) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
    Ok(if is_stdio(path) {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {path:?}"))?,
        )
    })
}

async fn open_output(path: &Path) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
    Ok(if is_stdio(path) {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {path:?}"))?,
        )
    })
}

/// Archive path for a command-line argument: no `./`, no trailing `/`, empty for `.`.
fn archive_path(arg: &str) -> &str {
    let mut path = arg;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    match path.trim_end_matches('/') {
        "." => "",
        path => path,
    }
}

async fn add_tree(builder: &mut ArchiveBuilder, root: &Path, relative: &str) -> Result<()> {
    // depth-first, parents before children; symbolic links are archived, never followed
    let mut pending = vec![relative.to_string()];
    while let Some(relative) = pending.pop() {
        let full = root.join(&relative);
        let stat = LocalFs
            .symlink_stat(&full)
            .await
            .with_context(|| format!("reading {full:?}"))?;
        let Some(kind) = stat.kind else {
            warn!("skipping socket {full:?}");
            continue;
        };
        let metadata = EntryMetadata::new(relative.as_str())
            .with_kind(kind)
            .with_mode(stat.mode)
            .with_mtime(stat.mtime)
            .with_owner(stat.uid, "")
            .with_group(stat.gid, "");

        match kind {
            EntryKind::Directory => {
                // the top of the tree itself is not an entry
                if !relative.is_empty() {
                    builder.append(Content::None, metadata)?;
                }
                let mut children = vec![];
                let mut dir = tokio::fs::read_dir(&full).await?;
                while let Some(child) = dir.next_entry().await? {
                    let name = child.file_name();
                    let name = name
                        .to_str()
                        .with_context(|| format!("non-UTF-8 file name in {full:?}"))?;
                    children.push(if relative.is_empty() {
                        name.to_string()
                    } else {
                        format!("{relative}/{name}")
                    });
                }
                children.sort();
                pending.extend(children.into_iter().rev());
            }
            EntryKind::Symlink => {
                let target = LocalFs
                    .read_link(&full)
                    .await
                    .with_context(|| format!("reading link {full:?}"))?;
                let target = target
                    .to_str()
                    .with_context(|| format!("non-UTF-8 link target of {full:?}"))?;
                builder.append(Content::None, metadata.with_link_name(target))?;
            }
            EntryKind::File | EntryKind::ContiguousFile => {
                let content = Content::from_path(&LocalFs, &full).await?;
                builder.append(content, metadata)?;
            }
            // fifos and devices are recorded by their header alone
            _ => builder.append(Content::None, metadata)?,
        }
    }
    Ok(())
}

struct ListSink<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin> EntrySink for ListSink<W> {
    async fn begin(&mut self, d: EntryDescriptor, _header: Header) -> ustar::Result<()> {
        let line = format!(
            "{:04o} {:>5}/{:<5} {:>12} {:>11} {}{}\n",
            d.mode,
            d.uid,
            d.gid,
            d.size,
            d.mtime,
            d.relative_path,
            if d.is_dir() { "/" } else { "" }
        );
        self.out.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn write(&mut self, _data: Vec<u8>) -> ustar::Result<()> {
        Ok(())
    }

    async fn end(&mut self) -> ustar::Result<()> {
        Ok(())
    }

    async fn finish(&mut self) -> ustar::Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = App::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.cmd {
        Command::Create {
            file,
            gzip,
            directory,
            paths,
        } => {
            let mut builder = ArchiveBuilder::new();
            for path in &paths {
                add_tree(&mut builder, &directory, archive_path(path)).await?;
            }
            let mut stream = builder.serialize(SerializeOptions { gzip })?;
            let mut out = open_output(&file).await?;
            tokio::io::copy(&mut stream, &mut out)
                .await
                .with_context(|| format!("writing {file:?}"))?;
            out.shutdown().await?;
        }
        Command::List { file, gzip } => {
            let mut input = open_input(&file).await?;
            if gzip {
                input = ustar::compression::decompress(input);
            }
            let mut sink = ListSink {
                out: tokio::io::stdout(),
            };
            decode_into(input, &mut sink, None).await?;
        }
        Command::Extract {
            file,
            gzip,
            directory,
        } => {
            let options = ExtractOptions {
                gzip,
                ..Default::default()
            };
            ustar::extract(open_input(&file).await?, Some(&directory), options)
                .await
                .with_context(|| format!("extracting {file:?} to {directory:?}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_archive_path() {
        assert_eq!(archive_path("."), "");
        assert_eq!(archive_path("./"), "");
        assert_eq!(archive_path("././a/b/"), "a/b");
        assert_eq!(archive_path("a"), "a");
    }

    #[tokio::test]
    async fn test_add_tree_keeps_special_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        std::fs::write(root.join("a.txt"), "hi")?;
        std::fs::create_dir(root.join("sub"))?;
        std::fs::write(root.join("sub/inner.txt"), "inner")?;
        // a cycle back to the root and a link to a directory
        std::os::unix::fs::symlink(".", root.join("loop"))?;
        std::os::unix::fs::symlink("sub", root.join("sublink"))?;
        let pipe = root.join("pipe");
        rustix::fs::mknodat(
            rustix::fs::CWD,
            &pipe,
            rustix::fs::FileType::Fifo,
            rustix::fs::Mode::from_raw_mode(0o600),
            0,
        )?;
        let _listener = std::os::unix::net::UnixListener::bind(root.join("sock"))?;

        let mut builder = ArchiveBuilder::new();
        add_tree(&mut builder, root, "").await?;

        let entries: Vec<_> = builder
            .entries()
            .map(|d| (d.relative_path.as_str(), d.kind, d.link_name.as_deref()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("a.txt", EntryKind::File, None),
                ("loop", EntryKind::Symlink, Some(".")),
                ("pipe", EntryKind::Fifo, None),
                ("sub", EntryKind::Directory, None),
                ("sub/inner.txt", EntryKind::File, None),
                ("sublink", EntryKind::Symlink, Some("sub")),
            ]
        );
        let pipe = builder.retrieve("pipe").unwrap();
        assert_eq!(pipe.descriptor().size, 0);
        assert_eq!(pipe.descriptor().mode, 0o600);
        Ok(())
    }
}
