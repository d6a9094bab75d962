//! Localized error message templates.
//!
//! Every error code has a built-in template in every supported locale.
//! Configuration may override single entries. `{scanners}` expands to the
//! names of the scanners that failed.

use std::collections::HashMap;

use crate::config::LocaleConfig;
use crate::locale::Locale;
use crate::orchestrator::error::ErrorCode;

fn builtin(locale: Locale, code: ErrorCode) -> &'static str {
    use ErrorCode::*;
    match (locale, code) {
        (Locale::En, AccessDenied) => "Access from your network address is not permitted.",
        (Locale::En, InvalidRequest) => "The request could not be understood.",
        (Locale::En, PromptBlocked) => "Your prompt was blocked by content policy ({scanners}).",
        (Locale::En, ResponseBlocked) => "The response was blocked by content policy ({scanners}).",
        (Locale::En, AdmissionRejected) => "The service is busy. Please retry later.",
        (Locale::En, UpstreamError) => "The model backend is unavailable. Please retry later.",
        (Locale::En, ScannerError) => "Content checks are temporarily unavailable. Please retry later.",
        (Locale::En, InternalError) => "An internal error occurred.",

        (Locale::Zh, AccessDenied) => "您的网络地址无权访问此服务。",
        (Locale::Zh, InvalidRequest) => "无法解析该请求。",
        (Locale::Zh, PromptBlocked) => "您的输入因违反内容策略被拦截（{scanners}）。",
        (Locale::Zh, ResponseBlocked) => "模型回复因违反内容策略被拦截（{scanners}）。",
        (Locale::Zh, AdmissionRejected) => "服务繁忙，请稍后重试。",
        (Locale::Zh, UpstreamError) => "模型后端暂不可用，请稍后重试。",
        (Locale::Zh, ScannerError) => "内容检查暂不可用，请稍后重试。",
        (Locale::Zh, InternalError) => "发生内部错误。",

        (Locale::Ja, AccessDenied) => "お使いのネットワークアドレスからのアクセスは許可されていません。",
        (Locale::Ja, InvalidRequest) => "リクエストを解釈できませんでした。",
        (Locale::Ja, PromptBlocked) => "入力はコンテンツポリシーによりブロックされました（{scanners}）。",
        (Locale::Ja, ResponseBlocked) => "応答はコンテンツポリシーによりブロックされました（{scanners}）。",
        (Locale::Ja, AdmissionRejected) => "サービスが混雑しています。しばらくしてから再試行してください。",
        (Locale::Ja, UpstreamError) => "モデルのバックエンドが利用できません。しばらくしてから再試行してください。",
        (Locale::Ja, ScannerError) => "コンテンツチェックが一時的に利用できません。",
        (Locale::Ja, InternalError) => "内部エラーが発生しました。",

        (Locale::Ko, AccessDenied) => "귀하의 네트워크 주소에서는 접근이 허용되지 않습니다.",
        (Locale::Ko, InvalidRequest) => "요청을 해석할 수 없습니다.",
        (Locale::Ko, PromptBlocked) => "입력이 콘텐츠 정책에 의해 차단되었습니다 ({scanners}).",
        (Locale::Ko, ResponseBlocked) => "응답이 콘텐츠 정책에 의해 차단되었습니다 ({scanners}).",
        (Locale::Ko, AdmissionRejected) => "서비스가 혼잡합니다. 잠시 후 다시 시도해 주세요.",
        (Locale::Ko, UpstreamError) => "모델 백엔드를 사용할 수 없습니다. 잠시 후 다시 시도해 주세요.",
        (Locale::Ko, ScannerError) => "콘텐츠 검사를 일시적으로 사용할 수 없습니다.",
        (Locale::Ko, InternalError) => "내부 오류가 발생했습니다.",

        (Locale::Ru, AccessDenied) => "Доступ с вашего сетевого адреса запрещён.",
        (Locale::Ru, InvalidRequest) => "Не удалось разобрать запрос.",
        (Locale::Ru, PromptBlocked) => "Ваш запрос заблокирован политикой контента ({scanners}).",
        (Locale::Ru, ResponseBlocked) => "Ответ заблокирован политикой контента ({scanners}).",
        (Locale::Ru, AdmissionRejected) => "Сервис перегружен. Повторите попытку позже.",
        (Locale::Ru, UpstreamError) => "Сервер модели недоступен. Повторите попытку позже.",
        (Locale::Ru, ScannerError) => "Проверка контента временно недоступна.",
        (Locale::Ru, InternalError) => "Произошла внутренняя ошибка.",

        (Locale::Vi, AccessDenied) => "Địa chỉ mạng của bạn không được phép truy cập.",
        (Locale::Vi, InvalidRequest) => "Không thể hiểu yêu cầu.",
        (Locale::Vi, PromptBlocked) => "Nội dung của bạn đã bị chặn bởi chính sách nội dung ({scanners}).",
        (Locale::Vi, ResponseBlocked) => "Phản hồi đã bị chặn bởi chính sách nội dung ({scanners}).",
        (Locale::Vi, AdmissionRejected) => "Dịch vụ đang bận. Vui lòng thử lại sau.",
        (Locale::Vi, UpstreamError) => "Máy chủ mô hình không khả dụng. Vui lòng thử lại sau.",
        (Locale::Vi, ScannerError) => "Kiểm tra nội dung tạm thời không khả dụng.",
        (Locale::Vi, InternalError) => "Đã xảy ra lỗi nội bộ.",
    }
}

/// Message table with configured overrides.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    overrides: HashMap<(Locale, ErrorCode), String>,
}

impl MessageCatalog {
    /// Unknown locale tags or codes in the overrides are skipped with a warning.
    pub fn from_config(config: &LocaleConfig) -> Self {
        let mut overrides = HashMap::new();
        for (tag, templates) in &config.messages {
            let Some(locale) = Locale::from_tag(tag) else {
                tracing::warn!(locale = %tag, "Ignoring messages for unsupported locale");
                continue;
            };
            for (code, template) in templates {
                match ErrorCode::parse(code) {
                    Some(code) => {
                        overrides.insert((locale, code), template.clone());
                    }
                    None => tracing::warn!(code = %code, "Ignoring message for unknown error code"),
                }
            }
        }
        Self { overrides }
    }

    /// Render the message for `code` in `locale`.
    pub fn render(&self, locale: Locale, code: ErrorCode, scanners: &[&str]) -> String {
        let template = self
            .overrides
            .get(&(locale, code))
            .map(String::as_str)
            .unwrap_or_else(|| builtin(locale, code));
        template.replace("{scanners}", &scanners.join(", "))
    }
}
