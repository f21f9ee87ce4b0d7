use anyhow::{anyhow, Context, Result};
use image::GrayImage;
use log::debug;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::NamedTempFile;

use super::merge::{select_proper, Glyph};
use super::preprocess::Binarized;
use super::setup::ensure_tesseract;
use crate::config::TesseractConfig;
use crate::process::output_with_timeout;

/// An external single-character recognizer.
///
/// Returns the engine's raw text output; interpretation into a [`Glyph`]
/// happens in [`glyph_from_output`].
pub trait CharacterEngine: Send + Sync {
    fn recognize(&self, img: &GrayImage) -> Result<String>;
}

/// Runs the tesseract executable in single-character mode.
pub struct TesseractEngine {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new(config: &TesseractConfig) -> Result<Self> {
        let paths = ensure_tesseract(config)?;
        Ok(Self {
            executable: paths.executable,
            tessdata: paths.tessdata,
            config: config.clone(),
        })
    }

    fn command(&self, input: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(input).arg("stdout");
        if let Some(dir) = &self.tessdata {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd.arg("-l")
            .arg(&self.config.language)
            .arg("--psm")
            .arg(self.config.psm.to_string())
            .arg("--oem")
            .arg(self.config.oem.to_string())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", self.config.char_whitelist))
            .arg("--dpi")
            .arg(self.config.dpi.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl CharacterEngine for TesseractEngine {
    fn recognize(&self, img: &GrayImage) -> Result<String> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())
            .context("Failed to write tesseract input image")?;

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let output = output_with_timeout(&mut self.command(temp_input.path()), timeout)
            .with_context(|| format!("Failed to run {}", self.executable.display()))?
            .ok_or_else(|| anyhow!("Tesseract killed after {:?}", timeout))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Interprets raw engine output.
///
/// Whitespace, newlines and form feeds are removed. Anything other than a
/// single character of the digit vocabulary is unreadable.
pub fn glyph_from_output(raw: &str) -> Glyph {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut chars = cleaned.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Glyph::from_char(c).unwrap_or(Glyph::Unreadable),
        _ => Glyph::Unreadable,
    }
}

/// Recognizer backed by a [`CharacterEngine`], run on both binarizations.
pub struct CharacterRecognizer<'a> {
    engine: &'a dyn CharacterEngine,
}

impl<'a> CharacterRecognizer<'a> {
    pub fn new(engine: &'a dyn CharacterEngine) -> Self {
        Self { engine }
    }

    fn recognize_one(&self, img: &GrayImage) -> Glyph {
        match self.engine.recognize(img) {
            Ok(raw) => glyph_from_output(&raw),
            Err(e) => {
                debug!("Character engine error: {:#}", e);
                Glyph::EngineError
            }
        }
    }

    /// Reads one digit crop of the normalized gray image.
    pub fn recognize_digit(&self, crop: &GrayImage) -> Glyph {
        let bin = Binarized::of(crop);
        let adaptive = self.recognize_one(&bin.adaptive);
        let otsu = self.recognize_one(&bin.otsu);
        select_proper(adaptive, otsu)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays scripted outputs in call order, then repeats the last one.
    pub(crate) struct ScriptedEngine {
        outputs: Mutex<Vec<Result<String, String>>>,
    }

    impl ScriptedEngine {
        pub(crate) fn new(outputs: &[&str]) -> Self {
            Self {
                outputs: Mutex::new(outputs.iter().rev().map(|s| Ok(s.to_string())).collect()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                outputs: Mutex::new(vec![Err("engine crashed".to_string())]),
            }
        }
    }

    impl CharacterEngine for ScriptedEngine {
        fn recognize(&self, _img: &GrayImage) -> Result<String> {
            let mut outputs = self.outputs.lock().unwrap();
            let next = if outputs.len() > 1 {
                outputs.pop().unwrap()
            } else {
                outputs[0].clone()
            };
            next.map_err(|e| anyhow!(e))
        }
    }

    #[test]
    fn test_glyph_from_output() {
        assert_eq!(glyph_from_output("7\n\x0c"), Glyph::Digit(7));
        assert_eq!(glyph_from_output(" -\n"), Glyph::Minus);
        assert_eq!(glyph_from_output("\x0c"), Glyph::Unreadable);
        assert_eq!(glyph_from_output(""), Glyph::Unreadable);
        assert_eq!(glyph_from_output("12\n"), Glyph::Unreadable);
        assert_eq!(glyph_from_output("A\n"), Glyph::Unreadable);
    }

    #[test]
    fn test_recognize_digit_prefers_fewer_strokes() {
        // Adaptive reads 8, Otsu reads 0: 0 lights fewer segments
        let engine = ScriptedEngine::new(&["8\n", "0\n"]);
        let recognizer = CharacterRecognizer::new(&engine);
        let crop = GrayImage::new(10, 20);
        assert_eq!(recognizer.recognize_digit(&crop), Glyph::Digit(0));
    }

    #[test]
    fn test_engine_failure_is_unreadable() {
        let engine = ScriptedEngine::failing();
        let recognizer = CharacterRecognizer::new(&engine);
        let crop = GrayImage::new(10, 20);
        assert_eq!(recognizer.recognize_one(&crop), Glyph::EngineError);
        assert_eq!(recognizer.recognize_digit(&crop), Glyph::Unreadable);
    }

    #[test]
    fn test_command_arguments() {
        let engine = TesseractEngine {
            executable: PathBuf::from("tesseract"),
            tessdata: Some(PathBuf::from("/data/tessdata")),
            config: TesseractConfig::default(),
        };
        let cmd = engine.command(std::path::Path::new("/tmp/in.png"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec![
                "/tmp/in.png", "stdout", "--tessdata-dir", "/data/tessdata", "-l", "eng", "--psm",
                "10", "--oem", "1", "-c", "tessedit_char_whitelist=-0123456789", "--dpi", "300",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_tesseract_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tesseract");
        std::fs::write(&exe, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = TesseractEngine {
            executable: exe,
            tessdata: None,
            config: TesseractConfig {
                timeout_ms: 200,
                ..TesseractConfig::default()
            },
        };
        let started = std::time::Instant::now();
        let err = engine.recognize(&GrayImage::new(10, 20)).unwrap_err();
        assert!(err.to_string().contains("killed"), "{:#}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
