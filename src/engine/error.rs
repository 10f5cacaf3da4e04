use std::fmt;

/// Step 처리 중 발생 가능한 오류를 표현한다.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// 입력 자체가 잘못된 경우이다(디스크 없음, 상호 배타 필드, 잘못된 이름 등).
    #[error("{0}")]
    Validation(String),
    /// 한 번도 등록되지 않은 리소스를 참조한 경우이다.
    #[error("{kind} {name:?} 참조를 찾을 수 없습니다.")]
    NotFound { kind: &'static str, name: String },
    /// 등록은 되어 있으나 지금 사용할 수 없는 리소스를 참조한 경우이다.
    #[error("{kind} {name:?}을(를) 사용할 수 없습니다: {reason}")]
    Unresolved {
        kind: &'static str,
        name: String,
        reason: String,
    },
    /// 참조 대상의 프로젝트/존이 맞지 않는 경우이다.
    #[error("{0}")]
    Reference(String),
    /// 원격 존재 확인이 실패했거나 대상이 없는 경우이다.
    #[error("{0}")]
    Lookup(String),
    /// 같은 논리 이름을 두 번 생성 등록한 경우이다.
    #[error("{kind} {name:?}은(는) 이미 Step {owner:?}에서 생성하도록 등록되어 있습니다.")]
    Conflict {
        kind: &'static str,
        name: String,
        owner: String,
    },
    /// 원격 생성 호출 자체가 실패한 경우이다.
    #[error("{0}")]
    RemoteOperation(String),
}

/// 여러 오류를 발견 순서대로 모아 한 번에 보고한다.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<ProvisionError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: ProvisionError) {
        self.0.push(err);
    }

    /// 다른 목록의 오류를 순서대로 이어 붙인다.
    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    /// `Result`의 오류만 골라 누적한다.
    pub fn absorb<T>(&mut self, result: Result<T, ErrorList>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(errs) => {
                self.extend(errs);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 비어 있으면 `Ok(())`, 아니면 자기 자신을 오류로 반환한다.
    pub fn into_result(self) -> Result<(), ErrorList> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

#[cfg(test)]
impl ProvisionError {
    /// 레지스트리 참조 계열 오류인지 확인한다.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ProvisionError::NotFound { .. }
                | ProvisionError::Unresolved { .. }
                | ProvisionError::Reference(_)
        )
    }
}

#[cfg(test)]
impl ErrorList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProvisionError> {
        self.0.iter()
    }
}

impl From<ProvisionError> for ErrorList {
    fn from(err: ProvisionError) -> Self {
        Self(vec![err])
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "오류 없음"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{}개의 오류가 발생했습니다:", many.len())?;
                for err in many {
                    write!(f, "\n* {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ErrorList {}

#[cfg(test)]
mod tests {
    use super::*;

    /// 오류가 여러 개면 발견 순서대로 모두 출력되는지 검증한다.
    #[test]
    fn error_list_formats_every_error_in_order() {
        let mut errs = ErrorList::new();
        errs.push(ProvisionError::Validation("첫 번째".into()));
        errs.push(ProvisionError::Lookup("두 번째".into()));
        let text = errs.to_string();
        assert!(text.starts_with("2개의 오류가 발생했습니다:"));
        let first = text.find("첫 번째").expect("첫 번째 오류 누락");
        let second = text.find("두 번째").expect("두 번째 오류 누락");
        assert!(first < second);
    }

    #[test]
    fn single_error_is_displayed_as_is() {
        let errs = ErrorList::from(ProvisionError::Validation("디스크 없음".into()));
        assert_eq!("디스크 없음", errs.to_string());
        assert!(ErrorList::new().into_result().is_ok());
    }
}
