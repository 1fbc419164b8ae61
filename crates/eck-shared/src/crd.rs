use snafu::{ResultExt, Snafu};

use crate::yaml::{SerializeOptions, YamlSchema};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to write CRD YAML schema to stdout"))]
    WriteToStdout { source: crate::yaml::Error },

    #[snafu(display("failed to generate CRD YAML schema"))]
    GenerateSchema { source: crate::yaml::Error },
}

/// YAML output for the `CustomResourceDefinition` of a custom resource.
pub trait CustomResourceExt: kube::CustomResourceExt {
    /// Prints the `CustomResourceDefinition` as an explicit YAML document
    /// (leading `---`) to [stdout](std::io::stdout).
    fn print_yaml_schema(operator_version: &str) -> Result<()> {
        Self::crd()
            .print_yaml_schema(operator_version, SerializeOptions::default())
            .context(WriteToStdoutSnafu)
    }

    fn yaml_schema(operator_version: &str) -> Result<String> {
        Self::crd()
            .generate_yaml_schema(operator_version, SerializeOptions::default())
            .context(GenerateSchemaSnafu)
    }
}

impl<T> CustomResourceExt for T where T: kube::CustomResourceExt {}
