use flux_config::{DecoderConfig, SourceType, VideoConfig};
use std::process::Stdio;
use tokio::process::Command;

/// 一次解码运行所需的全部参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub source_type: SourceType,
    pub locator: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u32,
}

impl SourceSpec {
    pub fn from_config(video: &VideoConfig, decoder: &DecoderConfig) -> Self {
        Self {
            source_type: video.source_type,
            locator: video.locator().trim().to_string(),
            fps: video.fps,
            width: decoder.width,
            height: decoder.height,
            jpeg_quality: decoder.jpeg_quality,
        }
    }
}

/// 解码子进程启动器
///
/// 返回的命令 stdout 必须输出连续的 JPEG 字节流。
pub trait DecoderLauncher: Send + Sync {
    fn program(&self) -> &str;

    fn command(&self, spec: &SourceSpec) -> Command;
}

/// 基于 ffmpeg 的启动器
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: String,
}

impl FfmpegLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(spec: &SourceSpec) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

        match spec.source_type {
            SourceType::Rtsp => {
                // 强制 TCP，连接超时 5 秒（微秒）
                args.extend(["-rtsp_transport", "tcp", "-timeout", "5000000"].map(String::from));
            }
            SourceType::Local => {
                // 无限循环，按原始速率读取
                args.extend(["-stream_loop", "-1", "-re"].map(String::from));
            }
        }

        args.push("-i".into());
        args.push(spec.locator.clone());
        args.extend(["-f", "image2pipe", "-vf"].map(String::from));
        args.push(format!("fps={},scale={}:{}", spec.fps, spec.width, spec.height));
        args.extend(["-vcodec", "mjpeg", "-q:v"].map(String::from));
        args.push(spec.jpeg_quality.to_string());
        args.push("-".into());
        args
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl DecoderLauncher for FfmpegLauncher {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, spec: &SourceSpec) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(source_type: SourceType, locator: &str) -> SourceSpec {
        SourceSpec {
            source_type,
            locator: locator.to_string(),
            fps: 10,
            width: 1280,
            height: 720,
            jpeg_quality: 5,
        }
    }

    #[test]
    fn test_rtsp_args() {
        let args = FfmpegLauncher::args(&spec(SourceType::Rtsp, "rtsp://cam/1"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner -loglevel error -rtsp_transport tcp -timeout 5000000 -i rtsp://cam/1"));
        assert!(joined.ends_with("-f image2pipe -vf fps=10,scale=1280:720 -vcodec mjpeg -q:v 5 -"));
        assert!(!args.contains(&"-stream_loop".to_string()));
    }

    #[test]
    fn test_local_args_loop_forever() {
        let args = FfmpegLauncher::args(&spec(SourceType::Local, "/data/pen3.mp4"));
        let pos = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[pos + 1], "-1");
        assert!(args.contains(&"-re".to_string()));
        assert!(!args.contains(&"-rtsp_transport".to_string()));
        // 输入参数必须位于 -i 之前
        assert!(pos < args.iter().position(|a| a == "-i").unwrap());
    }

    #[test]
    fn test_spec_from_config_uses_selected_locator() {
        let video = VideoConfig {
            source_type: SourceType::Local,
            rtsp_url: "rtsp://ignored".to_string(),
            local_path: " /data/a.mp4 ".to_string(),
            fps: 25,
        };
        let spec = SourceSpec::from_config(&video, &DecoderConfig::default());
        assert_eq!(spec.locator, "/data/a.mp4");
        assert_eq!(spec.fps, 25);
        assert_eq!((spec.width, spec.height), (1280, 720));
    }
}
