//! POSIX shell snippets composed into remote commands

/// Defines `$SUDO` as `sudo -n` unless the remote user is already root
pub const SUDO_PRELUDE: &str = r#"SUDO=""; [ "$(id -u)" -ne 0 ] && SUDO="sudo -n";"#;

/// Single-quote a value for POSIX sh
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `cd` into `dir` before running `command`
pub fn in_dir(dir: &str, command: &str) -> String {
    format!("cd {} && {}", quote(dir), command)
}

/// Prefix a script that refers to `$SUDO`
pub fn privileged(script: &str) -> String {
    format!("{} {}", SUDO_PRELUDE, script)
}

/// Install OS packages with whichever package manager the host has
pub fn package_install(packages: &str) -> String {
    privileged(&format!(
        "if command -v apt-get >/dev/null 2>&1; then \
$SUDO apt-get update -qq && $SUDO env DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {p}; \
elif command -v dnf >/dev/null 2>&1; then $SUDO dnf install -y {p}; \
elif command -v yum >/dev/null 2>&1; then $SUDO yum install -y {p}; \
elif command -v apk >/dev/null 2>&1; then $SUDO apk add --no-cache {p}; \
else echo 'no supported package manager found' >&2; exit 1; fi",
        p = packages
    ))
}

/// Parent directory of a remote path
pub fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}
