//! `gcloud` CLI wrapper for router and NAT operations.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::GatewayError;

/// Runs `gcloud` with the service account credentials file.
#[derive(Debug, Clone)]
pub struct GcloudCli {
    /// Binary to execute.
    binary: PathBuf,
    /// Service account key file used for `auth activate-service-account`.
    credentials_file: PathBuf,
}

impl GcloudCli {
    /// Use `gcloud` from `PATH`.
    #[must_use]
    pub fn new(credentials_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("gcloud"),
            credentials_file: credentials_file.into(),
        }
    }

    /// Use a specific binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Credentials file passed to `activate-service-account`.
    #[must_use]
    pub fn credentials_file(&self) -> &Path {
        &self.credentials_file
    }

    /// Run a command, returning stdout on success.
    async fn run(&self, args: &[&str]) -> Result<String, GatewayError> {
        let command = format!("gcloud {}", args.join(" "));
        debug!(command = %command, "Running gcloud");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                GatewayError::Config(format!("cannot run {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GatewayError::Cli { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a `describe` command. A "not found" failure means the resource is
    /// absent; any other failure is returned.
    async fn describes(&self, args: &[&str]) -> Result<bool, GatewayError> {
        match self.run(args).await {
            Ok(_) => Ok(true),
            Err(GatewayError::Cli { stderr, .. }) if reports_not_found(&stderr) => {
                debug!(stderr = %stderr, "Describe found nothing");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Activate the service account and select the project.
    ///
    /// # Errors
    /// Returns [`GatewayError::Cli`] if either command fails.
    pub async fn authenticate(&self, project: &str) -> Result<(), GatewayError> {
        let key_file = format!("--key-file={}", self.credentials_file.display());
        self.run(&["auth", "activate-service-account", &key_file])
            .await?;
        self.run(&["config", "set", "project", project]).await?;
        info!(project = %project, "Authenticated gcloud");
        Ok(())
    }

    /// `gcloud compute routers create`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Cli`] if the command fails.
    pub async fn create_router(
        &self,
        name: &str,
        network: &str,
        region: &str,
    ) -> Result<(), GatewayError> {
        self.run(&[
            "compute", "routers", "create", name, "--network", network, "--region", region,
        ])
        .await
        .map(|_| ())
    }

    /// `gcloud compute routers delete`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Cli`] if the command fails.
    pub async fn delete_router(&self, name: &str, region: &str) -> Result<(), GatewayError> {
        self.run(&[
            "compute", "routers", "delete", name, "--region", region, "--quiet",
        ])
        .await
        .map(|_| ())
    }

    /// Whether `gcloud compute routers describe` finds the router.
    ///
    /// # Errors
    /// Returns an error if `gcloud` cannot be executed or fails for any
    /// reason other than the router being absent.
    pub async fn router_exists(&self, name: &str, region: &str) -> Result<bool, GatewayError> {
        self.describes(&["compute", "routers", "describe", name, "--region", region])
            .await
    }

    /// `gcloud compute routers nats create` covering every subnet range.
    ///
    /// # Errors
    /// Returns [`GatewayError::Cli`] if the command fails.
    pub async fn create_nat(
        &self,
        name: &str,
        router: &str,
        region: &str,
    ) -> Result<(), GatewayError> {
        self.run(&[
            "compute",
            "routers",
            "nats",
            "create",
            name,
            "--router-region",
            region,
            "--router",
            router,
            "--auto-allocate-nat-external-ips",
            "--nat-all-subnet-ip-ranges",
        ])
        .await
        .map(|_| ())
    }

    /// `gcloud compute routers nats delete`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Cli`] if the command fails.
    pub async fn delete_nat(
        &self,
        name: &str,
        router: &str,
        region: &str,
    ) -> Result<(), GatewayError> {
        self.run(&[
            "compute", "routers", "nats", "delete", name, "--router", router, "--region", region,
            "--quiet",
        ])
        .await
        .map(|_| ())
    }

    /// Whether `gcloud compute routers nats describe` finds the NAT.
    ///
    /// # Errors
    /// Returns an error if `gcloud` cannot be executed or fails for any
    /// reason other than the NAT being absent.
    pub async fn nat_exists(
        &self,
        name: &str,
        router: &str,
        region: &str,
    ) -> Result<bool, GatewayError> {
        self.describes(&[
            "compute", "routers", "nats", "describe", name, "--router", router, "--region",
            region,
        ])
        .await
    }
}

/// Whether `gcloud` stderr says the resource does not exist.
fn reports_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("not found") || stderr.contains("not_found") || stderr.contains("404")
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// Stand-in `gcloud` that logs its arguments and fails `describe` for
    /// anything named `missing`.
    fn fake_gcloud(dir: &Path) -> PathBuf {
        let script = dir.join("gcloud");
        let log = dir.join("calls.log");
        let body = format!(
            "#!/bin/sh\necho \"$@\" >> {}\ncase \"$*\" in\n  *describe*missing*) echo \"ERROR: (gcloud.compute.routers.describe) The resource 'missing' was not found\" >&2; exit 1;;\n  *describe*noauth*) echo 'ERROR: (gcloud) You do not currently have an active account selected.' >&2; exit 1;;\n  *fail*) echo 'ERROR: quota' >&2; exit 1;;\nesac\nexit 0\n",
            log.display()
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_cli_commands() {
        let dir = tempfile::tempdir().unwrap();
        let cli = GcloudCli::new("/ops/gcp.json").with_binary(fake_gcloud(dir.path()));

        cli.authenticate("my-project").await.unwrap();
        cli.create_router("r1", "net1", "us-central1").await.unwrap();
        cli.create_nat("n1", "r1", "us-central1").await.unwrap();
        assert!(cli.router_exists("r1", "us-central1").await.unwrap());
        assert!(!cli.router_exists("missing", "us-central1").await.unwrap());
        assert!(!cli.nat_exists("missing", "r1", "us-central1").await.unwrap());

        let err = cli.delete_router("fail", "us-central1").await.unwrap_err();
        match err {
            GatewayError::Cli { command, stderr } => {
                assert_eq!(command, "gcloud compute routers delete fail --region us-central1 --quiet");
                assert_eq!(stderr, "ERROR: quota");
            }
            other => panic!("unexpected error: {other}"),
        }

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls[0], "auth activate-service-account --key-file=/ops/gcp.json");
        assert_eq!(calls[1], "config set project my-project");
        assert_eq!(calls[2], "compute routers create r1 --network net1 --region us-central1");
        assert_eq!(
            calls[3],
            "compute routers nats create n1 --router-region us-central1 --router r1 --auto-allocate-nat-external-ips --nat-all-subnet-ip-ranges"
        );
    }

    #[tokio::test]
    async fn test_describe_failure_other_than_not_found_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = GcloudCli::new("/ops/gcp.json").with_binary(fake_gcloud(dir.path()));

        let err = cli.router_exists("noauth", "us-central1").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Cli { ref stderr, .. } if stderr.contains("active account")
        ));
        assert!(cli.nat_exists("noauth", "r1", "us-central1").await.is_err());
    }

    #[test]
    fn test_reports_not_found() {
        assert!(reports_not_found("ERROR: NAT `n1` not found"));
        assert!(reports_not_found("The resource 'projects/p/regions/r/routers/x' was not found"));
        assert!(reports_not_found("HTTPError 404: NOT_FOUND"));
        assert!(!reports_not_found(
            "ERROR: (gcloud) You do not currently have an active account selected."
        ));
        assert!(!reports_not_found("Quota 'ROUTERS' exceeded"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let cli = GcloudCli::new("/ops/gcp.json").with_binary("/nonexistent/gcloud");
        assert!(cli.router_exists("r1", "us-central1").await.is_err());
    }
}
