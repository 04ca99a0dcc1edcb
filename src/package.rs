//! Package records as reported by `go list -json`, and the package node data
//! the store keeps for them.

use crate::directive::Directive;
use crate::graph::NodeId;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ModuleInfo {
    pub path: String,
    pub main: bool,
    pub go_mod: String,
}

/// One record of `go list -json` output.  Only the fields the driver uses
/// are decoded.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PackageInfo {
    pub dir: PathBuf,
    pub import_path: String,
    pub name: String,
    pub standard: bool,
    pub module: Option<ModuleInfo>,
    /// The command line patterns matching this package.
    #[serde(rename = "Match")]
    pub matches: Vec<String>,
    pub for_test: String,

    pub go_files: Vec<String>,
    pub cgo_files: Vec<String>,
    pub c_files: Vec<String>,
    #[serde(rename = "CXXFiles")]
    pub cxx_files: Vec<String>,
    pub m_files: Vec<String>,
    pub h_files: Vec<String>,
    pub f_files: Vec<String>,
    pub s_files: Vec<String>,
    pub swig_files: Vec<String>,
    #[serde(rename = "SwigCXXFiles")]
    pub swig_cxx_files: Vec<String>,
    pub syso_files: Vec<String>,
    pub test_go_files: Vec<String>,
    pub x_test_go_files: Vec<String>,

    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
    pub x_test_imports: Vec<String>,
}

/// Source file lists of a package, by kind.  Names are relative to the
/// package directory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FileLists {
    pub go: Vec<String>,
    pub cgo: Vec<String>,
    pub test_go: Vec<String>,
    pub xtest_go: Vec<String>,
    pub c: Vec<String>,
    pub cxx: Vec<String>,
    pub m: Vec<String>,
    pub h: Vec<String>,
    pub f: Vec<String>,
    pub s: Vec<String>,
    pub swig: Vec<String>,
    pub swig_cxx: Vec<String>,
    pub syso: Vec<String>,
}

impl FileLists {
    /// The non-Go list a file extension belongs to, if any.
    pub fn for_extension(&mut self, ext: &str) -> Option<&mut Vec<String>> {
        Some(match ext {
            "c" => &mut self.c,
            "cc" | "cpp" | "cxx" => &mut self.cxx,
            "m" => &mut self.m,
            "h" | "hh" | "hpp" | "hxx" => &mut self.h,
            "f" | "F" | "for" | "f90" => &mut self.f,
            "s" | "S" | "sx" => &mut self.s,
            "swig" => &mut self.swig,
            "swigcxx" => &mut self.swig_cxx,
            "syso" => &mut self.syso,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
pub struct Package {
    pub import_path: String,
    pub dir: PathBuf,
    pub name: String,
    pub standard: bool,
    pub module: Option<ModuleInfo>,
    pub files: FileLists,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
    pub xtest_imports: Vec<String>,

    /// Matched by a user pattern: its directives are to be run.
    pub generate: bool,
    /// Generation has reached a fixed point since the last undo.
    pub generated: bool,
    /// This is the external test twin of another package.
    pub is_xtest: bool,
    pub xtest: Option<NodeId>,
    pub directives: Vec<Directive>,
    /// Generation iterations run so far.
    pub gen_count: usize,
}

impl Package {
    pub fn from_info(info: PackageInfo) -> Package {
        Package {
            import_path: info.import_path,
            dir: info.dir,
            name: info.name,
            standard: info.standard,
            module: info.module,
            files: FileLists {
                go: info.go_files,
                cgo: info.cgo_files,
                test_go: info.test_go_files,
                xtest_go: info.x_test_go_files,
                c: info.c_files,
                cxx: info.cxx_files,
                m: info.m_files,
                h: info.h_files,
                f: info.f_files,
                s: info.s_files,
                swig: info.swig_files,
                swig_cxx: info.swig_cxx_files,
                syso: info.syso_files,
            },
            imports: info.imports,
            test_imports: info.test_imports,
            xtest_imports: info.x_test_imports,
            ..Default::default()
        }
    }

    /// The external test twin: same directory, the `_test` package.
    pub fn xtest_twin(&self) -> Package {
        Package {
            import_path: format!("{}_test", self.import_path),
            dir: self.dir.clone(),
            name: format!("{}_test", self.name),
            module: self.module.clone(),
            files: FileLists {
                xtest_go: self.files.xtest_go.clone(),
                ..Default::default()
            },
            xtest_imports: self.xtest_imports.clone(),
            generate: self.generate,
            is_xtest: true,
            ..Default::default()
        }
    }

    /// Every input file of the package, sorted.
    pub fn input_files(&self) -> Vec<&str> {
        let f = &self.files;
        let lists: Vec<&Vec<String>> = if self.is_xtest {
            vec![&f.xtest_go]
        } else {
            vec![
                &f.go, &f.cgo, &f.c, &f.cxx, &f.f, &f.m, &f.h, &f.s, &f.syso, &f.swig,
                &f.swig_cxx,
            ]
        };
        let mut files: Vec<&str> = lists.into_iter().flatten().map(|s| s.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files
    }

    /// The Go files whose directives belong to this package.
    pub fn directive_files(&self) -> Vec<&str> {
        let f = &self.files;
        let mut files: Vec<&str> = if self.is_xtest {
            f.xtest_go.iter().map(|s| s.as_str()).collect()
        } else {
            f.go.iter()
                .chain(&f.cgo)
                .chain(&f.test_go)
                .map(|s| s.as_str())
                .collect()
        };
        files.sort_unstable();
        files
    }

    /// The import paths this package depends on in the store.
    pub fn dep_imports(&self) -> Vec<&str> {
        let mut imports: Vec<&str> = if self.is_xtest {
            if self.generate {
                self.xtest_imports.iter().map(|s| s.as_str()).collect()
            } else {
                Vec::new()
            }
        } else if self.generate {
            self.imports
                .iter()
                .chain(&self.test_imports)
                .map(|s| s.as_str())
                .collect()
        } else {
            self.imports.iter().map(|s| s.as_str()).collect()
        };
        imports.retain(|&ip| ip != "C");
        imports.sort_unstable();
        imports.dedup();
        imports
    }
}
