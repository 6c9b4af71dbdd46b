//! Command lines run on the target host.
//!
//! Everything that talks to the container engine or touches remote files is
//! rendered here so the orchestration code only sequences calls.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::utils::shell::{join_remote, quote_arg, quote_path};

/// Container name of a service in a stack.
pub fn container_name(project: &str, service: &str) -> String {
    format!("{}-{}", project, service)
}

// ============================================================================
// Compose
// ============================================================================

/// `up -d --no-deps` for one service, optionally forcing recreation.
pub fn compose_up(project: &str, descriptor: &str, service: &str, force_recreate: bool) -> String {
    let mut cmd = format!(
        "docker compose -p {} -f {} up -d --no-deps",
        quote_arg(project),
        quote_path(descriptor)
    );
    if force_recreate {
        cmd.push_str(" --force-recreate");
    }
    cmd.push(' ');
    cmd.push_str(&quote_arg(service));
    cmd
}

pub fn compose_validate(descriptor: &str) -> String {
    format!("docker compose -f {} config -q", quote_path(descriptor))
}

// ============================================================================
// Images and containers
// ============================================================================

pub fn docker_build(tag: &str, context_dir: &str, dockerfile: &str, target: Option<&str>) -> String {
    let mut cmd = format!(
        "docker build -t {} -f {}",
        quote_arg(tag),
        quote_path(&join_remote(context_dir, dockerfile))
    );
    if let Some(target) = target {
        cmd.push_str(" --target ");
        cmd.push_str(&quote_arg(target));
    }
    cmd.push(' ');
    cmd.push_str(&quote_path(context_dir));
    cmd
}

pub fn docker_pull(image: &str) -> String {
    format!("docker pull {}", quote_arg(image))
}

pub fn docker_remove(container: &str) -> String {
    format!("docker rm -f {}", quote_arg(container))
}

/// Prints the container name when it is running, nothing otherwise.
pub fn docker_running(container: &str) -> String {
    format!(
        "docker ps --filter {} --format {}",
        quote_arg(&format!("name=^{}$", container)),
        quote_arg("{{.Names}}")
    )
}

/// Prints the health status, or the plain state when no health check is defined.
pub fn docker_health(container: &str) -> String {
    format!(
        "docker inspect --format {} {}",
        quote_arg("{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}"),
        quote_arg(container)
    )
}

pub fn network_inspect(name: &str) -> String {
    format!("docker network inspect {}", quote_arg(name))
}

pub fn network_create(name: &str) -> String {
    format!("docker network create {}", quote_arg(name))
}

// ============================================================================
// Remote files
// ============================================================================

/// Print a file, or nothing when it does not exist. Other read failures exit non-zero.
pub fn read_if_exists(path: &str) -> String {
    let p = quote_path(path);
    format!("if [ -f {p} ]; then cat {p}; fi")
}

pub fn mkdir_p(dir: &str) -> String {
    format!("mkdir -p {}", quote_path(dir))
}

/// Replace `path` with `content`. The content travels base64-encoded.
pub fn write_file(path: &str, content: &str) -> String {
    format!(
        "printf '%s' {} | base64 -d > {}",
        quote_arg(&STANDARD.encode(content.as_bytes())),
        quote_path(path)
    )
}

/// Write `content` to a private (0600) file.
pub fn write_private_file(path: &str, content: &str) -> String {
    format!("(umask 077 && {})", write_file(path, content))
}

/// Create an empty 0600 file unless one already exists.
pub fn create_private_if_absent(path: &str) -> String {
    let p = quote_path(path);
    format!("[ -f {p} ] || (umask 077 && : > {p})")
}

pub fn move_file(from: &str, to: &str) -> String {
    format!("mv -f {} {}", quote_path(from), quote_path(to))
}

pub fn remove_file(path: &str) -> String {
    format!("rm -f {}", quote_path(path))
}

pub fn remove_dir(path: &str) -> String {
    format!("rm -rf {}", quote_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_up_targets_one_service() {
        assert_eq!(
            compose_up("myapp", "/srv/myapp/docker-compose.yml", "api", true),
            "docker compose -p myapp -f '/srv/myapp/docker-compose.yml' up -d --no-deps --force-recreate api"
        );
        assert_eq!(
            compose_up("myapp", "/srv/myapp/docker-compose.yml", "db", false),
            "docker compose -p myapp -f '/srv/myapp/docker-compose.yml' up -d --no-deps db"
        );
    }

    #[test]
    fn build_command_includes_target_only_when_set() {
        assert_eq!(
            docker_build("myapp-api:4", "/tmp/berth-build-x", "Dockerfile", Some("prod")),
            "docker build -t myapp-api:4 -f '/tmp/berth-build-x/Dockerfile' --target prod '/tmp/berth-build-x'"
        );
        assert!(!docker_build("a:1", "/tmp/b", "Dockerfile", None).contains("--target"));
    }

    #[test]
    fn running_filter_is_anchored() {
        assert_eq!(
            docker_running("myapp-api"),
            "docker ps --filter 'name=^myapp-api$' --format '{{.Names}}'"
        );
    }

    #[test]
    fn write_file_encodes_content() {
        let cmd = write_file("/srv/app/x.yml", "a: 'b'\n");
        assert!(cmd.starts_with("printf '%s' "));
        assert!(cmd.contains(&STANDARD.encode("a: 'b'\n")));
        assert!(cmd.ends_with("| base64 -d > '/srv/app/x.yml'"));
    }
}
