//! In-process stand-in for the model provider, shared by the stage tests.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::ai::ModelClient;
use crate::error::PipelineError;
use crate::manifest::Manifest;

/// Deterministic fake: captions echo the frame's contents, rewrites prefix the
/// text, images are the prompt's bytes. Any input containing `fail_on` fails.
#[derive(Default)]
pub(crate) struct FakeModels {
    missing_credential: bool,
    fail_on: Option<String>,
    echo_rewrite: bool,
    calls: Cell<usize>,
    instructions: RefCell<Vec<String>>,
}

impl FakeModels {
    pub(crate) fn without_credential() -> Self {
        Self {
            missing_credential: true,
            ..Default::default()
        }
    }

    pub(crate) fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_owned()),
            ..Default::default()
        }
    }

    /// Rewrites hand the caption straight back.
    pub(crate) fn echoing() -> Self {
        Self {
            echo_rewrite: true,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }

    pub(crate) fn instructions(&self) -> Vec<String> {
        self.instructions.borrow().clone()
    }

    fn call(&self, instruction: &str, input: &str) -> Result<(), PipelineError> {
        self.ensure_credential()?;
        self.calls.set(self.calls.get() + 1);
        self.instructions.borrow_mut().push(instruction.to_owned());
        match &self.fail_on {
            Some(needle) if input.contains(needle.as_str()) => {
                Err(PipelineError::upstream(500, format!("fake failure on {needle}")))
            }
            _ => Ok(()),
        }
    }
}

impl ModelClient for FakeModels {
    fn ensure_credential(&self) -> Result<(), PipelineError> {
        if self.missing_credential {
            Err(PipelineError::MissingCredential)
        } else {
            Ok(())
        }
    }

    async fn describe_image(
        &self,
        instruction: &str,
        _cue: &str,
        image_url: String,
    ) -> Result<String, PipelineError> {
        let payload = image_url
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or_default();
        let bytes = BASE64_STANDARD
            .decode(payload)
            .map_err(|e| PipelineError::upstream(400, e.to_string()))?;
        let contents = String::from_utf8_lossy(&bytes).into_owned();
        self.call(instruction, &contents)?;
        Ok(format!("  caption of {contents}  "))
    }

    async fn rewrite_text(&self, instruction: &str, text: &str) -> Result<String, PipelineError> {
        self.call(instruction, text)?;
        if self.echo_rewrite {
            return Ok(format!("{text}\n"));
        }
        Ok(format!("reimagined {text}"))
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, PipelineError> {
        self.call("generate", prompt)?;
        Ok(format!("image for {prompt}").into_bytes())
    }
}

/// Writes `count` frames named `frame_0001.png`.. whose bytes are their own file names.
pub(crate) fn write_frames(dir: &Path, count: usize) -> Manifest {
    fs::create_dir_all(dir).unwrap();
    for index in 1..=count {
        let name = format!("frame_{index:04}.png");
        fs::write(dir.join(&name), name.as_bytes()).unwrap();
    }
    Manifest::from_frames(dir).unwrap()
}

/// Installs a shell script standing in for ffmpeg. Extraction writes `frames`
/// frames; assembly writes the sorted names of its input images into the
/// output file, or fails like ffmpeg when there are none.
#[cfg(unix)]
pub(crate) fn fake_ffmpeg(dir: &Path, frames: usize) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        r#"#!/bin/sh
input=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
  last="$arg"
done
case "$last" in
  *frame_%04d.png)
    out_dir=$(dirname "$last")
    i=1
    while [ "$i" -le {frames} ]; do
      name=$(printf 'frame_%04d.png' "$i")
      printf '%s' "$name" > "$out_dir/$name"
      i=$((i + 1))
    done
    ;;
  *)
    in_dir=$(dirname "$input")
    if [ -z "$(ls "$in_dir")" ]; then
      echo "$input: No such file or directory" >&2
      exit 1
    fi
    ls "$in_dir" > "$last"
    ;;
esac
"#
    );
    fs::create_dir_all(dir).unwrap();
    let path = dir.join("ffmpeg");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Serves a minimal images API on a random local port: `/v1/images/generations`
/// answers with one URL (or none when `with_url` is false) pointing back at
/// `/img`, which answers with `image_status` and `image_body`.
pub(crate) async fn serve_images(
    image_status: u16,
    image_body: Vec<u8>,
    with_url: bool,
) -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            let header_end = loop {
                let read = socket.read(&mut chunk).await.unwrap_or(0);
                if read == 0 {
                    break None;
                }
                request.extend_from_slice(&chunk[..read]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break Some(end + 4);
                }
            };
            let Some(header_end) = header_end else {
                continue;
            };
            let head = String::from_utf8_lossy(&request[..header_end]).into_owned();
            let content_length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while request.len() < header_end + content_length {
                let read = socket.read(&mut chunk).await.unwrap_or(0);
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }

            let path = head.split_whitespace().nth(1).unwrap_or("/");
            let (status, content_type, body) = if path.ends_with("/images/generations") {
                let data = if with_url {
                    format!(r#"[{{"url":"http://127.0.0.1:{port}/img"}}]"#)
                } else {
                    "[]".to_owned()
                };
                let json = format!(r#"{{"created":0,"data":{data}}}"#);
                (200, "application/json", json.into_bytes())
            } else {
                (image_status, "application/octet-stream", image_body.clone())
            };
            let header = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: {content_type}\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(header.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        }
    });

    port
}
