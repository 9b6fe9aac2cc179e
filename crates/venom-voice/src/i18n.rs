//! Localized text for failures surfaced to the user.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ko,
    En,
}

/// What went wrong, as the user sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transcription,
    Generation,
    Synthesis,
    MissingCredential,
    Microphone,
    Playback,
}

impl Locale {
    pub fn failure_message(&self, kind: FailureKind, detail: &str) -> String {
        let (prefix, with_detail) = match (self, kind) {
            (Locale::Ko, FailureKind::Transcription) => ("음성 인식 오류", true),
            (Locale::Ko, FailureKind::Generation) => ("처리 오류", true),
            (Locale::Ko, FailureKind::Synthesis) => ("음성 합성 오류", true),
            (Locale::Ko, FailureKind::MissingCredential) => {
                ("API 키가 제공되지 않았습니다.", false)
            }
            (Locale::Ko, FailureKind::Microphone) => ("마이크 접근 오류", true),
            (Locale::Ko, FailureKind::Playback) => ("오디오 재생 오류", false),
            (Locale::En, FailureKind::Transcription) => ("Transcription error", true),
            (Locale::En, FailureKind::Generation) => ("Processing error", true),
            (Locale::En, FailureKind::Synthesis) => ("Speech synthesis error", true),
            (Locale::En, FailureKind::MissingCredential) => {
                ("No API key was provided.", false)
            }
            (Locale::En, FailureKind::Microphone) => ("Microphone access error", true),
            (Locale::En, FailureKind::Playback) => ("Audio playback error", false),
        };
        if with_detail && !detail.is_empty() {
            format!("{}: {}", prefix, detail)
        } else {
            prefix.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn korean_generation_error_carries_detail() {
        assert_eq!(
            Locale::Ko.failure_message(FailureKind::Generation, "timeout"),
            "처리 오류: timeout"
        );
    }

    #[test]
    fn credential_message_hides_detail() {
        let text = Locale::En.failure_message(FailureKind::MissingCredential, "DEEPSEEK_API_KEY");
        assert_eq!(text, "No API key was provided.");
    }
}
