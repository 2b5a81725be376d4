//! PyInstaller 单文件打包
//!
//! 用配置的解释器探测 `import PyInstaller`；构建目录为 `final/_build_<stem>/{dist,work,spec}`，
//! 输出写入 build.log，产物复制为 `final/<stem>.exe`。

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::error::PackagingError;
use crate::packaging::{BuildOutput, BuildRequest, Packager};

/// PyInstaller 打包器
#[derive(Debug, Clone)]
pub struct PyInstallerPackager {
    python: String,
}

impl PyInstallerPackager {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn args(request: &BuildRequest) -> Vec<String> {
        let root = request.build_root();
        let mut args = vec![
            "-m".to_string(),
            "PyInstaller".to_string(),
            "--onefile".to_string(),
            "--noconfirm".to_string(),
            "--clean".to_string(),
            "--name".to_string(),
            request.stem.clone(),
            "--distpath".to_string(),
            root.join("dist").display().to_string(),
            "--workpath".to_string(),
            root.join("work").display().to_string(),
            "--specpath".to_string(),
            root.join("spec").display().to_string(),
        ];
        if request.windowed {
            args.push("--windowed".to_string());
        }
        args.push(request.script.display().to_string());
        args
    }
}

#[async_trait]
impl Packager for PyInstallerPackager {
    fn name(&self) -> &str {
        "pyinstaller"
    }

    async fn available(&self) -> bool {
        Command::new(&self.python)
            .args(["-c", "import PyInstaller"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput, PackagingError> {
        let root = request.build_root();
        let dist = root.join("dist");
        for dir in [&dist, &root.join("work"), &root.join("spec")] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let log = root.join("build.log");
        let log_file = std::fs::File::create(&log)?;
        let args = Self::args(request);
        tracing::info!(python = %self.python, args = ?args, "running PyInstaller");

        let status = Command::new(&self.python)
            .args(&args)
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .status()
            .await?;
        if !status.success() {
            return Err(PackagingError::BuildFailed {
                status: status.to_string(),
                log,
            });
        }

        // Windows 上是 <stem>.exe，其他平台无扩展名
        let built = [dist.join(format!("{}.exe", request.stem)), dist.join(&request.stem)]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or(PackagingError::NoOutput)?;
        let exe = request.target_exe();
        tokio::fs::copy(&built, &exe).await?;
        Ok(BuildOutput { exe, log })
    }
}
