//! Model preprocessing and per-worker instantiation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::rv::{Assignment, RvDescriptor};
use crate::ModelError;

/// The deterministic portion of a probabilistic model: the original text
/// with every `random` declaration stripped out, plus the naming scheme for
/// per-worker instances.
#[derive(Debug, Clone)]
pub struct ModelTemplate {
    body: String,
    stem: String,
    extension: Option<String>,
}

impl ModelTemplate {
    pub fn body(&self) -> &str {
        &self.body
    }

    /// File name of the instance written for `worker_id`.
    pub fn instance_file_name(&self, worker_id: usize) -> String {
        match &self.extension {
            Some(ext) => format!("{}_{worker_id}.{ext}", self.stem),
            None => format!("{}_{worker_id}", self.stem),
        }
    }
}

/// Split a probabilistic model file into its deterministic template and the
/// ordered list of random-variable descriptors.
pub fn preprocess(path: &Path) -> Result<(ModelTemplate, Vec<RvDescriptor>), ModelError> {
    let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rvs: Vec<RvDescriptor> = Vec::new();
    let mut body = String::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim_start().starts_with("random") {
            let rv = RvDescriptor::parse(line, idx + 1)?;
            if rvs.iter().any(|seen| seen.name == rv.name) {
                return Err(ModelError::Duplicate { name: rv.name });
            }
            rvs.push(rv);
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    let extension = path.extension().map(|s| s.to_string_lossy().into_owned());

    Ok((
        ModelTemplate {
            body,
            stem,
            extension,
        },
        rvs,
    ))
}

/// Write the deterministic instance for one worker: a `#define` line per
/// random variable followed by the template body. Returns the written path.
pub fn instantiate(
    template: &ModelTemplate,
    rvs: &[RvDescriptor],
    assignment: &Assignment,
    worker_id: usize,
    dir: &Path,
) -> Result<PathBuf, ModelError> {
    if assignment.len() != rvs.len() {
        return Err(ModelError::AssignmentArity {
            expected: rvs.len(),
            got: assignment.len(),
        });
    }

    let mut contents = String::new();
    for (rv, token) in rvs.iter().zip(assignment.tokens()) {
        contents.push_str(&format!("#define {} {token}\n", rv.name));
    }
    contents.push_str(&template.body);

    let path = dir.join(template.instance_file_name(worker_id));
    fs::write(&path, contents).map_err(|source| ModelError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rv::Distribution;
    use std::io::Write;

    const MODEL: &str = "\
random mu ~ normal(0.0, 1.0);
random d ~ uniform(0.1, 0.9);
[0, 5] time;
{ mode 1; invt: (x <= mu); flow: d/dt[x] = d; jump: (x = mu) ==> @2 (x' = x); }
";

    fn write_model(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bouncing.pdrh");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn preprocess_splits_declarations_from_the_body() {
        let (_dir, path) = write_model(MODEL);
        let (template, rvs) = preprocess(&path).unwrap();
        assert_eq!(rvs.len(), 2);
        assert_eq!(rvs[0].name, "mu");
        assert_eq!(rvs[1].distribution, Distribution::Uniform { lo: 0.1, hi: 0.9 });
        assert!(!template.body().contains("random"));
        assert!(template.body().contains("[0, 5] time;"));
    }

    #[test]
    fn preprocess_rejects_duplicate_variables() {
        let (_dir, path) = write_model("random a ~ uniform(0, 1);\nrandom a ~ uniform(0, 1);\n");
        assert!(matches!(
            preprocess(&path),
            Err(ModelError::Duplicate { name }) if name == "a"
        ));
    }

    #[test]
    fn preprocess_reports_unreadable_files() {
        assert!(matches!(
            preprocess(Path::new("/nonexistent/model.pdrh")),
            Err(ModelError::Io { .. })
        ));
    }

    #[test]
    fn instantiate_writes_defines_then_body_under_a_worker_name() {
        let (dir, path) = write_model(MODEL);
        let (template, rvs) = preprocess(&path).unwrap();
        let assignment = Assignment::new(vec!["0.37".into(), "0.5".into()]);

        let instance = instantiate(&template, &rvs, &assignment, 3, dir.path()).unwrap();
        assert_eq!(
            instance.file_name().unwrap().to_str().unwrap(),
            "bouncing_3.pdrh"
        );
        let contents = fs::read_to_string(&instance).unwrap();
        assert!(contents.starts_with("#define mu 0.37\n#define d 0.5\n"));
        assert!(contents.contains("[0, 5] time;"));
    }

    #[test]
    fn instantiate_rejects_mismatched_assignments() {
        let (dir, path) = write_model(MODEL);
        let (template, rvs) = preprocess(&path).unwrap();
        let short = Assignment::new(vec!["0.37".into()]);
        assert!(matches!(
            instantiate(&template, &rvs, &short, 0, dir.path()),
            Err(ModelError::AssignmentArity {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn instance_names_are_namespaced_by_worker() {
        let (_dir, path) = write_model(MODEL);
        let (template, _) = preprocess(&path).unwrap();
        assert_eq!(template.instance_file_name(0), "bouncing_0.pdrh");
        assert_eq!(template.instance_file_name(7), "bouncing_7.pdrh");
    }
}
