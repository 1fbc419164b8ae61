use std::path::PathBuf;

use clap::{Args, Parser};

use crate::namespace::WatchNamespace;

pub const AUTHOR: &str = "ECK operator developers";

/// Environment variable holding the log filter, in `EnvFilter` syntax.
pub const LOG_ENV_VAR: &str = "ECK_OPERATOR_LOG";

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command<Run: Args = RunArguments> {
    /// Print the CustomResourceDefinitions of the operator as a YAML stream.
    Crd,

    /// Run the operator.
    Run(Run),
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(long_about = "")]
pub struct RunArguments {
    /// The namespace the operator is running in. License and trial status
    /// Secrets are read from and written to this namespace.
    #[arg(long, env)]
    pub operator_namespace: String,

    /// Restricts the operator to a single namespace. Empty means all.
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Maximum number of objects reconciled in parallel per controller.
    #[arg(long, env, default_value_t = 3)]
    pub max_concurrent_reconciles: u16,

    /// Identifies this operator installation. Generated when absent.
    #[arg(long, env)]
    pub operator_uuid: Option<String>,

    /// Directory holding `tls.crt` and `tls.key` for the admission webhook
    /// server. The server is not started without it.
    #[arg(long, env)]
    pub webhook_cert_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 8443)]
    pub webhook_port: u16,

    /// Also write JSON logs into this directory, rotated daily.
    #[arg(long, env = "ECK_OPERATOR_LOG_DIRECTORY")]
    pub log_directory: Option<PathBuf>,

    /// Maximum length of Elasticsearch names accepted by the admission webhook.
    #[arg(long, default_value_t = 36)]
    pub max_name_length: usize,

    /// PKIX DER encoded RSA public key enterprise licenses are signed with.
    /// Without it only self-generated trial licenses are accepted.
    #[arg(long, env)]
    pub license_public_key: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        RunArguments::command().print_long_help().unwrap();
        RunArguments::command().debug_assert();
    }

    #[test]
    fn run_arguments_defaults() {
        let Command::Run(args) = Command::<RunArguments>::parse_from([
            "eck-operator",
            "run",
            "--operator-namespace",
            "elastic-system",
        ]) else {
            panic!("expected the run subcommand");
        };

        assert_eq!(args.operator_namespace, "elastic-system");
        assert_eq!(args.max_concurrent_reconciles, 3);
        assert_eq!(args.webhook_port, 8443);
        assert_eq!(args.max_name_length, 36);
        assert_eq!(args.webhook_cert_dir, None);
        assert_eq!(args.license_public_key, None);
    }

    #[test]
    fn watch_namespace_is_parsed() {
        let args = RunArguments::parse_from([
            "run",
            "--operator-namespace",
            "elastic-system",
            "--watch-namespace",
            "team-a",
        ]);
        assert_eq!(args.watch_namespace, WatchNamespace::One("team-a".to_owned()));
    }
}
