use std::path::Path;
use std::sync::Arc;

use tokio::process::Command;
use tracing::info;

use crate::config::RenderSection;

use super::error::{PipelineError, PipelineResult};
use super::services::CommandExecutor;

/// Drives the external transcoder. The exit code is the sole success
/// signal; a non-zero status becomes a render error carrying the captured
/// stderr.
pub struct VideoRenderer {
    config: RenderSection,
    executor: Arc<dyn CommandExecutor>,
}

impl VideoRenderer {
    pub fn new(config: RenderSection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { config, executor }
    }

    /// Static title card: background colour plus artist/title drawtext.
    pub async fn render_title(
        &self,
        artist: &str,
        title: &str,
        output: &Path,
    ) -> PipelineResult<()> {
        let [width, height] = self.config.resolution;
        let background = format!(
            "color=c={}:s={width}x{height}:d={}",
            self.config.background_color, self.config.title_seconds
        );
        let filter = format!(
            "drawtext=font='{font}':text='{artist}':fontsize=120:fontcolor=white:\
             x=(w-text_w)/2:y=(h-text_h)/2-100,\
             drawtext=font='{font}':text='{title}':fontsize=180:fontcolor=white:\
             x=(w-text_w)/2:y=(h-text_h)/2+100",
            font = self.config.font,
            artist = escape_drawtext(artist),
            title = escape_drawtext(title),
        );
        let mut command = Command::new(&self.config.ffmpeg_binary);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(&background)
            .arg("-vf")
            .arg(&filter)
            .arg("-c:v")
            .arg("prores_ks")
            .arg(output);
        info!(output = %output.display(), "rendering title video");
        self.run_checked(command).await
    }

    /// Final karaoke video: instrumental audio over a plain background with
    /// the compiled subtitles burned in.
    pub async fn render_karaoke(
        &self,
        instrumental: &Path,
        subtitles: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        let [width, height] = self.config.resolution;
        let background = format!(
            "color=c={}:s={width}x{height}",
            self.config.background_color
        );
        let filter = format!("ass='{}'", escape_filter_path(subtitles));
        let mut command = Command::new(&self.config.ffmpeg_binary);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(&background)
            .arg("-i")
            .arg(instrumental)
            .arg("-vf")
            .arg(&filter)
            .arg("-map")
            .arg("0:v")
            .arg("-map")
            .arg("1:a")
            .arg("-c:v")
            .arg("libx264")
            .arg("-c:a")
            .arg("aac")
            .arg("-shortest")
            .arg(output);
        info!(output = %output.display(), "rendering karaoke video");
        self.run_checked(command).await
    }

    async fn run_checked(&self, mut command: Command) -> PipelineResult<()> {
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| PipelineError::io(&self.config.ffmpeg_binary, source))?;
        if !output.status.success() {
            return Err(PipelineError::Render {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::Mutex;

    struct RecordingExecutor {
        args: Mutex<Vec<String>>,
        exit_code: i32,
        stderr: &'static str,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
            let std_command = command.as_std();
            let mut args: Vec<String> = vec![std_command
                .get_program()
                .to_string_lossy()
                .to_string()];
            args.extend(
                std_command
                    .get_args()
                    .map(|arg| arg.to_string_lossy().to_string()),
            );
            *self.args.lock().unwrap() = args;
            Ok(std::process::Output {
                status: std::process::ExitStatus::from_raw(self.exit_code),
                stdout: Vec::new(),
                stderr: self.stderr.as_bytes().to_vec(),
            })
        }
    }

    fn renderer(executor: Arc<RecordingExecutor>) -> VideoRenderer {
        VideoRenderer::new(
            RenderSection {
                ffmpeg_binary: "ffmpeg".to_string(),
                resolution: [3840, 2160],
                background_color: "black".to_string(),
                font: "Avenir Next Bold".to_string(),
                title_seconds: 5.0,
            },
            executor,
        )
    }

    #[tokio::test]
    async fn title_render_builds_drawtext_filter() {
        let executor = Arc::new(RecordingExecutor {
            args: Mutex::new(Vec::new()),
            exit_code: 0,
            stderr: "",
        });
        let renderer = renderer(Arc::clone(&executor));
        renderer
            .render_title("ABBA", "Waterloo", Path::new("/out/x (Title).mov"))
            .await
            .unwrap();
        let args = executor.args.lock().unwrap().join(" ");
        assert!(args.starts_with("ffmpeg"));
        assert!(args.contains("drawtext"));
        assert!(args.contains("Waterloo"));
        assert!(args.contains("3840x2160"));
    }

    #[tokio::test]
    async fn failing_transcoder_surfaces_stderr() {
        let executor = Arc::new(RecordingExecutor {
            args: Mutex::new(Vec::new()),
            exit_code: 256, // wait status encoding exit code 1
            stderr: "no such filter",
        });
        let renderer = renderer(executor);
        let result = renderer
            .render_karaoke(
                Path::new("/out/i.flac"),
                Path::new("/out/k.ass"),
                Path::new("/out/final.mp4"),
            )
            .await;
        match result {
            Err(PipelineError::Render { status, stderr }) => {
                assert_eq!(status, Some(1));
                assert!(stderr.contains("no such filter"));
            }
            other => panic!("expected render error, got {other:?}"),
        }
    }
}
