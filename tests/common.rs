use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

// Test helper types and methods are shared by every integration test
// binary, and not every binary uses every helper. The warnings are
// suppressed to keep CI clean while maintaining the shared API.
#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");

        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_upkeep"));

        Self {
            _temp_dir: temp_dir,
            config_dir,
            bin_path,
        }
    }

    pub fn cmd(&self) -> Command {
        self.cmd_for(&self.bin_path)
    }

    /// Like cmd(), but running an arbitrary binary (e.g. a scratch copy of
    /// upkeep) under the same isolated environment.
    pub fn cmd_for(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("UPKEEP_CONFIG_DIR", &self.config_dir);
        // Point release queries at a closed port so no test talks to the
        // real API by accident.
        cmd.env("UPKEEP_API_BASE", "http://127.0.0.1:1");
        // Isolate HOME so a developer's netrc cannot leak into tests
        cmd.env("HOME", self._temp_dir.path());
        cmd.env("XDG_CONFIG_HOME", self._temp_dir.path().join("xdg"));
        cmd
    }

    /// Like cmd(), but with release queries pointed at the real GitHub API.
    pub fn cmd_live(&self) -> Command {
        let mut cmd = self.cmd();
        cmd.env_remove("UPKEEP_API_BASE");
        cmd
    }

    pub fn state_path(&self) -> PathBuf {
        self.config_dir.join("autoupdate.json")
    }

    pub fn write_state(&self, content: &str) {
        fs::create_dir_all(&self.config_dir).expect("Failed to create config dir");
        fs::write(self.state_path(), content).expect("Failed to write state file");
    }

    pub fn read_state(&self) -> String {
        fs::read_to_string(self.state_path()).expect("Failed to read state file")
    }
}

/// Request paths the binary uses against its release repository.
#[allow(dead_code)]
pub const LATEST_RELEASE_PATH: &str = "/repos/morgaesis/upkeep/releases/latest";
#[allow(dead_code)]
pub const ASSET_PATH: &str = "/repos/morgaesis/upkeep/releases/assets/77";

/// Latest-release JSON with one asset (id 77) named for this platform.
#[allow(dead_code)]
pub fn release_json(tag: &str) -> Vec<u8> {
    format!(
        r#"{{"tag_name":"{}","assets":[{{"name":"upkeep_{}","id":77}}]}}"#,
        tag,
        platform_suffix()
    )
    .into_bytes()
}

/// Asset-name suffix for the running platform, in the release pipeline's
/// Go-toolchain vocabulary.
#[allow(dead_code)]
pub fn platform_suffix() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{}_{}.tar.gz", os, arch)
}

/// A gzipped tar holding a single file entry, shaped like a release asset.
#[allow(dead_code)]
pub fn release_archive(entry_name: &str, content: &[u8]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, entry_name, content)
        .expect("Failed to append archive entry");

    builder
        .into_inner()
        .expect("Failed to finish archive")
        .finish()
        .expect("Failed to finish gzip stream")
}

/// One canned reply from a [`MockApi`] route.
#[allow(dead_code)]
pub enum MockReply {
    /// Answer with this status code and body.
    Body(u16, Vec<u8>),
    /// Close the connection without answering.
    Hangup,
}

/// A local stand-in for the release API. Serves canned replies per request
/// path (each used once, the last one repeating) and records every path it
/// is asked for. Unknown paths get an empty 404.
#[allow(dead_code)]
pub struct MockApi {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl MockApi {
    pub fn serve(routes: Vec<(&str, Vec<MockReply>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock API");
        let base_url = format!(
            "http://{}",
            listener.local_addr().expect("mock API has no address")
        );
        let requests = Arc::new(Mutex::new(Vec::new()));

        let mut table: HashMap<String, (usize, Vec<MockReply>)> = routes
            .into_iter()
            .map(|(path, replies)| (path.to_string(), (0, replies)))
            .collect();
        let seen = Arc::clone(&requests);

        // The serving thread parks on accept until the test binary exits.
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let path = match read_request_path(&mut stream) {
                    Some(path) => path,
                    None => continue,
                };
                seen.lock().unwrap().push(path.clone());

                let reply = match table.get_mut(&path) {
                    Some((served, replies)) if !replies.is_empty() => {
                        let next = (*served).min(replies.len() - 1);
                        *served += 1;
                        match &replies[next] {
                            MockReply::Body(status, body) => Some((*status, body.clone())),
                            MockReply::Hangup => None,
                        }
                    }
                    _ => Some((404, Vec::new())),
                };

                // Hangup answers by dropping the stream mid-request.
                if let Some((status, body)) = reply {
                    let head = format!(
                        "HTTP/1.1 {} {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        status,
                        reason(status),
                        body.len()
                    );
                    let _ = stream.write_all(head.as_bytes());
                    let _ = stream.write_all(&body);
                }
            }
        });

        Self { base_url, requests }
    }

    /// Every request path seen so far, in arrival order.
    pub fn request_paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Reads one request head off the stream, returning its path.
#[allow(dead_code)]
fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;

    // Drain the headers before any reply is written.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" => break,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }

    request_line.split_whitespace().nth(1).map(str::to_string)
}

#[allow(dead_code)]
fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        _ => "",
    }
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

// Assertion helpers used to verify command output.
#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        if self.status.success() {
            panic!(
                "Command unexpectedly succeeded\nstdout: {}\nstderr: {}",
                self.stdout, self.stderr
            );
        }
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stdout_lacks(&self, text: &str) -> &Self {
        assert!(
            !self.stdout.contains(text),
            "Stdout unexpectedly contained '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Stderr did not contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }
}
