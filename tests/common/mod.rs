//! Shared test doubles: a scripted container toolchain and a tiny HTTP server.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use s2i_harness::{HarnessConfig, ProcessOutput, ProcessRunner, Result, RetryPolicy, RunOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const CONTAINER_ID: &str = "c0ffee1234";
pub const USAGE_TEXT: &str = "This is a S2I dotnet builder image.\n\
    To use it, install S2I and run:\n  s2i build <source> dotnet-test <app>\n";

/// Scripted stand-in for `s2i`, `docker` and `git`.
pub struct FakeToolchain {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub usage_text: String,
    pub image_present: bool,
    pub build_exit: i32,
    pub write_cid: bool,
    pub ip: String,
    pub cli_output: String,
    pub pid1: String,
    pub dotnet_version: String,
    pub npm_path: String,
    /// Propagate uppercase proxy variables to lowercase names.
    pub propagate_proxy: bool,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            usage_text: USAGE_TEXT.to_string(),
            image_present: true,
            build_exit: 0,
            write_cid: true,
            ip: "127.0.0.1".to_string(),
            cli_output: "---> Running application from /opt/app-root/app ...\nHello World!\n"
                .to_string(),
            pid1: "dotnet\0app.dll\0".to_string(),
            dotnet_version: "8.0.110".to_string(),
            npm_path: "/usr/bin/npm".to_string(),
            propagate_proxy: true,
        }
    }
}

impl FakeToolchain {
    /// Every invocation as `program arg1 arg2 ...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.join(" "))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn docker(&self, args: &[String]) -> ProcessOutput {
        let first = args.first().map(String::as_str).unwrap_or_default();
        match first {
            "inspect" => {
                let target = args.get(1).cloned().unwrap_or_default();
                if target == CONTAINER_ID {
                    ProcessOutput::ok(format!(
                        r#"[{{"Id": "{}", "NetworkSettings": {{"IPAddress": "{}"}}}}]"#,
                        CONTAINER_ID, self.ip
                    ))
                } else if self.image_present {
                    ProcessOutput::ok("[{}]")
                } else {
                    ProcessOutput::failed(1, format!("Error: No such object: {}", target))
                }
            }
            "image" | "rmi" | "stop" | "rm" => ProcessOutput::ok(""),
            "run" if args.get(1).is_some_and(|a| a.starts_with("--cidfile=")) => {
                if self.write_cid {
                    let path = args[1].trim_start_matches("--cidfile=");
                    std::fs::write(path, format!("{}\n", CONTAINER_ID)).unwrap();
                    ProcessOutput::ok(CONTAINER_ID)
                } else {
                    ProcessOutput::failed(125, "docker: Error response from daemon")
                }
            }
            "run" => self.run_rm(args),
            "exec" => {
                let command = args.last().cloned().unwrap_or_default();
                self.shell(&command, &[])
            }
            _ => ProcessOutput::failed(1, format!("unexpected docker call {:?}", args)),
        }
    }

    fn run_rm(&self, args: &[String]) -> ProcessOutput {
        let mut env = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-e" {
                if let Some((k, v)) = iter.next().and_then(|kv| kv.split_once('=')) {
                    env.push((k.to_string(), v.to_string()));
                }
            }
        }

        match args.iter().position(|a| a == "-c") {
            Some(i) => self.shell(&args[i + 1], &env),
            None if args.last().is_some_and(|image| image.ends_with("-testapp")) => {
                ProcessOutput::ok(self.cli_output.clone())
            }
            None => ProcessOutput::ok(self.usage_text.clone()),
        }
    }

    fn shell(&self, command: &str, env: &[(String, String)]) -> ProcessOutput {
        if let Some(var) = command.strip_prefix("echo $") {
            let lookup = |name: &str| env.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
            let value = lookup(var)
                .or_else(|| {
                    self.propagate_proxy
                        .then(|| lookup(&var.to_uppercase()))
                        .flatten()
                })
                .unwrap_or_default();
            return ProcessOutput::ok(format!("{}\n", value));
        }
        match command {
            "dotnet --version" => ProcessOutput::ok(format!("{}\n", self.dotnet_version)),
            "cat /proc/1/cmdline" => ProcessOutput::ok(self.pid1.clone()),
            "command -v npm" => ProcessOutput::ok(format!("{}\n", self.npm_path)),
            _ => ProcessOutput::failed(127, format!("{}: command not found", command)),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeToolchain {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<ProcessOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(call);

        let out = match program {
            "git" => {
                if args.first().is_some_and(|a| a == "init") {
                    if let Some(cwd) = &options.cwd {
                        std::fs::create_dir_all(cwd.join(".git")).unwrap();
                    }
                }
                ProcessOutput::ok("")
            }
            "s2i" => match args.first().map(String::as_str) {
                Some("usage") => ProcessOutput::ok(self.usage_text.clone()),
                Some("build") if self.build_exit == 0 => {
                    ProcessOutput::ok("Build completed successfully\n")
                }
                Some("build") => {
                    ProcessOutput::failed(self.build_exit, "error: assemble script failed")
                }
                _ => ProcessOutput::failed(1, "unknown s2i command"),
            },
            "docker" => self.docker(args),
            _ => ProcessOutput::failed(127, format!("{}: not found", program)),
        };
        Ok(out)
    }
}

/// Creates fixture directories with a placeholder source file.
pub fn make_fixtures(root: &Path, names: &[&str]) {
    for name in names {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Program.cs"), "// test app\n").unwrap();
    }
}

/// Fast policies and the given fixtures dir and app port.
pub fn test_config(fixtures: &Path, app_port: u16) -> HarnessConfig {
    HarnessConfig::new("dotnet-test")
        .with_fixtures_dir(fixtures)
        .with_app_port(app_port)
        .with_policies(
            RetryPolicy::new(5, Duration::from_millis(10)),
            RetryPolicy::new(3, Duration::from_millis(10)),
        )
}

/// Serves fixed `(path, status, body)` routes on 127.0.0.1; returns the port.
pub async fn serve(routes: Vec<(&'static str, u16, Vec<u8>)>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, s, b)| (*s, b.clone()))
                    .unwrap_or((404, b"not found".to_vec()));

                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    port
}
