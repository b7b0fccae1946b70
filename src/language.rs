//! 응답 언어 및 언어별 안내 문구
//!
//! 분석은 항상 원문 언어(한국어)로 수행하고, 목표 언어가 다르면
//! 완성된 결과를 통째로 번역합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, RagError};

/// 지원 언어
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "zh")]
    Chinese,
    #[serde(rename = "es")]
    Spanish,
}

impl Language {
    /// 문서 원문 언어
    pub const SOURCE: Language = Language::Korean;

    pub const ALL: [Language; 5] = [
        Language::Korean,
        Language::English,
        Language::Japanese,
        Language::Chinese,
        Language::Spanish,
    ];

    /// ISO 639-1 코드
    pub fn code(self) -> &'static str {
        match self {
            Language::Korean => "ko",
            Language::English => "en",
            Language::Japanese => "ja",
            Language::Chinese => "zh",
            Language::Spanish => "es",
        }
    }

    /// 해당 언어로 표기한 언어 이름 (번역 프롬프트용)
    pub fn native_name(self) -> &'static str {
        match self {
            Language::Korean => "한국어",
            Language::English => "English",
            Language::Japanese => "日本語",
            Language::Chinese => "中文",
            Language::Spanish => "Español",
        }
    }

    pub fn is_source(self) -> bool {
        self == Self::SOURCE
    }

    pub fn messages(self) -> &'static LocalizedMessages {
        match self {
            Language::Korean => &KO,
            Language::English => &EN,
            Language::Japanese => &JA,
            Language::Chinese => &ZH,
            Language::Spanish => &ES,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = RagError;

    /// 코드("en")와 언어 이름("English", "한국어") 모두 허용
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| {
                lang.code() == normalized || lang.native_name().to_lowercase() == normalized
            })
            .ok_or_else(|| RagError::InvalidInput(format!("unsupported language: {}", s)))
    }
}

// ============================================================================
// Localized Messages
// ============================================================================

/// 언어별 고정 안내 문구
#[derive(Debug)]
pub struct LocalizedMessages {
    /// 관련성 게이트에서 거부된 질문
    pub off_topic: &'static str,
    /// 어떤 검색 전략으로도 청크를 찾지 못함
    pub no_results: &'static str,
    /// 언어 모델 응답을 얻지 못함
    pub answer_unavailable: &'static str,
    pub quota_exceeded: &'static str,
    pub service_unavailable: &'static str,
    pub session_expired: &'static str,
    pub not_found: &'static str,
    pub invalid_input: &'static str,
    pub unsupported_format: &'static str,
    pub extraction_failed: &'static str,
    pub internal: &'static str,
    /// 템플릿 폴백 분석 결과에 붙는 안내
    pub degraded_analysis: &'static str,
}

impl LocalizedMessages {
    pub fn for_code(&self, code: ErrorCode) -> &'static str {
        match code {
            ErrorCode::InvalidInput => self.invalid_input,
            ErrorCode::UnsupportedFormat => self.unsupported_format,
            ErrorCode::ExtractionFailed => self.extraction_failed,
            ErrorCode::QuotaExceeded => self.quota_exceeded,
            ErrorCode::ServiceUnavailable => self.service_unavailable,
            ErrorCode::SessionExpired => self.session_expired,
            ErrorCode::NotFound => self.not_found,
            ErrorCode::Internal => self.internal,
        }
    }
}

static KO: LocalizedMessages = LocalizedMessages {
    off_topic: "죄송합니다. 업로드하신 계약서 내용에 대해서만 답변드릴 수 있습니다. 계약서와 관련된 질문을 해주세요.",
    no_results: "해당 내용을 계약서에서 찾을 수 없습니다. 계약서에 실제로 포함된 조항이나 내용으로 다시 질문해주세요.",
    answer_unavailable: "관련 정보를 찾을 수 없습니다. 잠시 후 다시 질문해주세요.",
    quota_exceeded: "서비스 사용 한도에 도달했습니다. 나중에 다시 이용해주세요.",
    service_unavailable: "서비스가 일시적으로 응답하지 않습니다. 잠시 후 다시 시도해주세요.",
    session_expired: "세션 정보가 만료되었습니다. 문서를 다시 업로드해주세요.",
    not_found: "문서를 찾을 수 없습니다.",
    invalid_input: "입력값이 올바르지 않습니다.",
    unsupported_format: "지원하지 않는 파일 형식입니다. (PDF, DOCX, TXT만 가능)",
    extraction_failed: "문서에서 텍스트를 추출할 수 없습니다.",
    internal: "처리 중 오류가 발생했습니다.",
    degraded_analysis: "※ 자동 분석 품질이 기준에 미달하여 일반 점검 항목으로 대체되었습니다.",
};

static EN: LocalizedMessages = LocalizedMessages {
    off_topic: "I can only answer questions about the uploaded contract content. Please ask contract-related questions.",
    no_results: "That content cannot be found in the contract. Please ask again with clauses or content actually included in the contract.",
    answer_unavailable: "Could not find relevant information. Please try again shortly.",
    quota_exceeded: "The service limit has been reached. Please try again later.",
    service_unavailable: "The service is temporarily unavailable. Please try again.",
    session_expired: "Your session has expired. Please re-upload your document.",
    not_found: "Document not found.",
    invalid_input: "The request is invalid.",
    unsupported_format: "Unsupported file format. (PDF, DOCX and TXT only)",
    extraction_failed: "Could not extract text from the document.",
    internal: "An error occurred while processing the request.",
    degraded_analysis: "Note: the automatic analysis did not meet the quality bar and was replaced by a general checklist.",
};

static JA: LocalizedMessages = LocalizedMessages {
    off_topic: "申し訳ございませんが、アップロードされた契約書内容についてのみ回答できます。契約書に関連する質問をしてください。",
    no_results: "その内容は契約書に見つかりません。契約書に実際に含まれている条項や内容で再度質問してください。",
    answer_unavailable: "関連情報が見つかりませんでした。しばらくしてから再度お試しください。",
    quota_exceeded: "サービスの利用上限に達しました。後ほど再度ご利用ください。",
    service_unavailable: "サービスが一時的に利用できません。しばらくしてから再度お試しください。",
    session_expired: "セッションの有効期限が切れました。文書を再度アップロードしてください。",
    not_found: "文書が見つかりません。",
    invalid_input: "入力内容が正しくありません。",
    unsupported_format: "サポートされていないファイル形式です。(PDF、DOCX、TXTのみ)",
    extraction_failed: "文書からテキストを抽出できませんでした。",
    internal: "処理中にエラーが発生しました。",
    degraded_analysis: "※ 自動分析の品質が基準に達しなかったため、一般的な確認項目に置き換えました。",
};

static ZH: LocalizedMessages = LocalizedMessages {
    off_topic: "抱歉，只能回答上传的合同内容相关问题。请提出与合同相关的问题。",
    no_results: "在合同中找不到该内容。请用合同中实际包含的条款或内容重新提问。",
    answer_unavailable: "未能找到相关信息。请稍后再试。",
    quota_exceeded: "已达到服务使用上限。请稍后再试。",
    service_unavailable: "服务暂时不可用。请稍后再试。",
    session_expired: "会话已过期。请重新上传文档。",
    not_found: "找不到文档。",
    invalid_input: "输入无效。",
    unsupported_format: "不支持的文件格式。(仅支持 PDF、DOCX、TXT)",
    extraction_failed: "无法从文档中提取文本。",
    internal: "处理过程中发生错误。",
    degraded_analysis: "※ 自动分析质量未达标准，已替换为通用检查项目。",
};

static ES: LocalizedMessages = LocalizedMessages {
    off_topic: "Solo puedo responder preguntas sobre el contenido del contrato subido. Por favor haga preguntas relacionadas con el contrato.",
    no_results: "Ese contenido no se puede encontrar en el contrato. Por favor pregunte nuevamente con cláusulas o contenido realmente incluido en el contrato.",
    answer_unavailable: "No se encontró información relevante. Inténtelo de nuevo en breve.",
    quota_exceeded: "Se alcanzó el límite del servicio. Inténtelo más tarde.",
    service_unavailable: "El servicio no está disponible temporalmente. Inténtelo de nuevo.",
    session_expired: "Su sesión ha expirado. Vuelva a subir su documento.",
    not_found: "Documento no encontrado.",
    invalid_input: "La solicitud no es válida.",
    unsupported_format: "Formato de archivo no compatible. (solo PDF, DOCX y TXT)",
    extraction_failed: "No se pudo extraer texto del documento.",
    internal: "Se produjo un error al procesar la solicitud.",
    degraded_analysis: "Nota: el análisis automático no alcanzó el nivel de calidad y se reemplazó por una lista de verificación general.",
};

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes_and_names() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::English);
        assert_eq!("한국어".parse::<Language>().unwrap(), Language::Korean);
        assert_eq!(" JA ".parse::<Language>().unwrap(), Language::Japanese);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_source_language() {
        assert!(Language::Korean.is_source());
        assert!(!Language::English.is_source());
        assert_eq!(Language::default(), Language::SOURCE);
    }

    #[test]
    fn test_every_language_has_distinct_messages() {
        for lang in Language::ALL {
            let messages = lang.messages();
            assert!(!messages.off_topic.is_empty());
            assert_ne!(messages.off_topic, messages.no_results);
        }
    }

    #[test]
    fn test_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&Language::Chinese).unwrap(), "\"zh\"");
        let lang: Language = serde_json::from_str("\"es\"").unwrap();
        assert_eq!(lang, Language::Spanish);
    }
}
