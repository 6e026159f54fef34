//! Shared fixtures: FFmpeg stand-ins and throwaway configs.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Answers `-version`; otherwise copies the first 1000 bytes of the `-i`
/// input to the last argument, like a very aggressive encoder.
pub const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffmpeg version 6.1-fake Copyright (c) 2000-2024"
  exit 0
fi
in=""
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-i" ]; then
    shift
    in="$1"
  fi
  out="$1"
  shift
done
head -c 1000 "$in" > "$out"
"#;

/// Rejects every input the way FFmpeg does with a corrupt file.
pub const FAILING_FFMPEG: &str = r#"#!/bin/sh
echo "[image2 @ 0x55] Could not find codec parameters" >&2
echo "in.jpg: Invalid data found when processing input" >&2
exit 1
"#;

/// Never finishes on its own.
pub const HANGING_FFMPEG: &str = r#"#!/bin/sh
sleep 30
"#;

/// Records its pid in `pid_file`, then stalls far past any test deadline.
pub fn stalling_ffmpeg(pid_file: &Path) -> String {
    format!(
        "#!/bin/sh\necho $$ > '{}'\nexec sleep 60\n",
        pid_file.display()
    )
}

/// Poll `path` until a tool script has written its pid there.
pub fn wait_for_pid(path: &Path, deadline: Duration) -> i32 {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if let Some(pid) = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse().ok())
        {
            return pid;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("no pid written to {} within {:?}", path.display(), deadline);
}

/// Poll until `pid` no longer exists or is only a zombie waiting to be reaped.
pub fn process_gone(pid: i32, deadline: Duration) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let start = Instant::now();
    while start.elapsed() < deadline {
        let zombie = std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .ok()
            .and_then(|stat| {
                stat.rsplit(')')
                    .next()
                    .map(|rest| rest.trim_start().starts_with('Z'))
            })
            .unwrap_or(false);
        if zombie || kill(Pid::from_raw(pid), None).is_err() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn storage(&self) -> PathBuf {
        self.path().join("storage")
    }

    pub fn write_tool(&self, name: &str, script: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, script).unwrap();
        path
    }

    pub fn write_input(&self, name: &str, len: usize) -> PathBuf {
        let path = self.path().join(name);
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Write a config file pointing at `tool` (run through `/bin/sh` so the
    /// script needs no exec bit) and return its path.
    pub fn write_config(&self, tool: &Path, extra: &str) -> PathBuf {
        self.write_config_with_timeout(tool, 1, extra)
    }

    pub fn write_config_with_timeout(
        &self,
        tool: &Path,
        timeout_secs: u64,
        extra: &str,
    ) -> PathBuf {
        let path = self.path().join("pixpress.toml");
        let content = format!(
            r#"
[storage]
root_dir = {root:?}

[ffmpeg]
path = {tool:?}
launcher = ["/bin/sh"]
timeout_secs = {timeout_secs}

{extra}
"#,
            root = self.storage().to_string_lossy(),
            tool = tool.to_string_lossy(),
            timeout_secs = timeout_secs,
            extra = extra,
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn config(&self, tool: &Path) -> pixpress::Config {
        let mut config = pixpress::Config::default();
        config.storage.root_dir = self.storage();
        config.ffmpeg.path = tool.to_string_lossy().into_owned();
        config.ffmpeg.launcher = vec!["/bin/sh".to_string()];
        config.ffmpeg.timeout_secs = 1;
        config
    }
}
