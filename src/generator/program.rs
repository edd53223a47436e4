//! Program output sources

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

use super::delimited::parse_delimited;
use super::error::GeneratorError;
use super::source::decode;
use super::{GeneratorContext, RawRows, RowGenerator, lazy};
use crate::location::AppUrl;

/// Rows printed as CSV by a local program
///
/// The program runs in the package's working directory with the resource environment
/// exported, plus `PACKAGE_LIB_DIR` when the package has a library directory. It runs
/// once per pass, on the first pull.
#[derive(Debug, Clone)]
pub struct ProgramGenerator {
    url: AppUrl,
    ctx: GeneratorContext,
    program: PathBuf,
}

impl ProgramGenerator {
    pub fn new(url: AppUrl, ctx: GeneratorContext) -> Result<Self, GeneratorError> {
        let program = url
            .to_file_path()
            .ok_or_else(|| GeneratorError::ProgramNotLocal {
                url: url.to_string(),
            })?;
        let program = if program.is_relative() {
            ctx.working_dir.join(program)
        } else {
            program
        };
        Ok(Self { url, ctx, program })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.current_dir(&self.ctx.working_dir).envs(&self.ctx.env);
        if let Some(lib_dir) = &self.ctx.lib_dir {
            command.env("PACKAGE_LIB_DIR", lib_dir);
        }
        command
    }

    fn open(&self) -> Result<RawRows, GeneratorError> {
        info!("Running {}", self.program.display());
        let output = self
            .command()
            .output()
            .map_err(|e| GeneratorError::io(&self.program, e))?;

        if !output.status.success() {
            return Err(GeneratorError::ProgramFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!("{} wrote {} bytes", self.program.display(), output.stdout.len());

        let text = decode(&output.stdout, &self.ctx.encoding_for(&self.url))?;
        Ok(parse_delimited(Box::new(Cursor::new(text.into_bytes())), b','))
    }
}

impl RowGenerator for ProgramGenerator {
    fn url(&self) -> &AppUrl {
        &self.url
    }

    fn rows(&self) -> RawRows {
        let this = self.clone();
        lazy(move || this.open())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::generator::test_support::{collect, context};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(temp: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = temp.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_program_output_with_environment() {
        let temp = TempDir::new().unwrap();
        script(&temp, "gen.sh", "echo 'name,region'\necho \"$RESOURCE_NAME,$REGION\"");

        let mut env = BTreeMap::new();
        env.insert("RESOURCE_NAME".to_string(), "people".to_string());
        env.insert("REGION".to_string(), "north".to_string());
        let ctx = context(&temp).with_env(env);

        let url = AppUrl::parse("program+file:gen.sh").unwrap();
        let generator = ProgramGenerator::new(url, ctx).unwrap();
        assert_eq!(
            collect(&generator),
            vec![vec![json!("name"), json!("region")], vec![json!("people"), json!("north")]]
        );
    }

    #[test]
    fn test_failing_program() {
        let temp = TempDir::new().unwrap();
        script(&temp, "fail.sh", "echo boom >&2\nexit 3");

        let url = AppUrl::parse("program+file:fail.sh").unwrap();
        let generator = ProgramGenerator::new(url, context(&temp)).unwrap();
        match generator.rows().next() {
            Some(Err(GeneratorError::ProgramFailed { stderr, .. })) => assert_eq!(stderr, "boom"),
            other => panic!("expected program failure, got {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn test_remote_program_rejected() {
        let temp = TempDir::new().unwrap();
        let url = AppUrl::parse("program+http://example.com/gen.sh").unwrap();
        let err = ProgramGenerator::new(url, context(&temp)).unwrap_err();
        assert!(err.is_construction_error());
    }
}
