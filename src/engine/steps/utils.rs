use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

const RFC1035: &str = r"[a-z]([-a-z0-9]*[a-z0-9])?";
const PROJECT: &str = r"[a-z]([-.:a-z0-9]*[a-z0-9])?";

/// 리소스 이름 형식(RFC 1035)이다.
pub(crate) static NAME_RGX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{RFC1035}$")).expect("정규식 컴파일 실패"));

pub(crate) static DISK_URL_RGX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(projects/(?P<project>{PROJECT})/)?zones/(?P<zone>{RFC1035})/disks/(?P<disk>{RFC1035})$"
    ))
    .expect("정규식 컴파일 실패")
});

pub(crate) static DISK_TYPE_URL_RGX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(projects/(?P<project>{PROJECT})/)?zones/(?P<zone>{RFC1035})/diskTypes/(?P<disktype>{RFC1035})$"
    ))
    .expect("정규식 컴파일 실패")
});

pub(crate) static IMAGE_URL_RGX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(projects/(?P<project>{PROJECT})/)?global/images/((family/(?P<family>{RFC1035}))?|(?P<image>{RFC1035}))$"
    ))
    .expect("정규식 컴파일 실패")
});

pub(crate) static INSTANCE_URL_RGX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(projects/(?P<project>{PROJECT})/)?zones/(?P<zone>{RFC1035})/instances/(?P<instance>{RFC1035})$"
    ))
    .expect("정규식 컴파일 실패")
});

pub(crate) static MACHINE_TYPE_URL_RGX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(projects/(?P<project>{PROJECT})/)?zones/(?P<zone>{RFC1035})/machineTypes/(?P<machinetype>{RFC1035})$"
    ))
    .expect("정규식 컴파일 실패")
});

pub(crate) static NETWORK_URL_RGX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(projects/(?P<project>{PROJECT})/)?global/networks/(?P<network>{RFC1035})$"
    ))
    .expect("정규식 컴파일 실패")
});

/// 값이 비어 있으면 기본값을 사용한다.
pub(crate) fn str_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// `projects/<project>/` 접두어가 없는 부분 URL을 확장한다.
pub(crate) fn extend_partial_url(url: &str, project: &str) -> String {
    if url.starts_with("projects") {
        url.to_string()
    } else {
        format!("projects/{project}/{url}")
    }
}

/// 정규식의 이름 있는 캡처 그룹을 맵으로 추출한다. 매칭되지 않은 그룹은 빈 문자열이다.
pub(crate) fn named_subexp(re: &Regex, value: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let captures = re.captures(value);
    for name in re.capture_names().flatten() {
        let matched = captures
            .as_ref()
            .and_then(|caps| caps.name(name))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        result.insert(name.to_string(), matched);
    }
    result
}

/// 리소스 이름이 RFC 1035 형식이고 63자 이하인지 확인한다.
pub(crate) fn check_name(name: &str) -> bool {
    name.len() <= 63 && NAME_RGX.is_match(name)
}

pub(crate) fn check_disk_mode(mode: &str) -> bool {
    matches!(mode, "READ_WRITE" | "READ_ONLY")
}

/// 슬래시로 경로 조각을 잇는다. 빈 조각과 중복 슬래시는 제거한다.
pub(crate) fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_partial_url_keeps_qualified_urls() {
        assert_eq!(
            "projects/p1/zones/z1/disks/d1",
            extend_partial_url("zones/z1/disks/d1", "p1")
        );
        assert_eq!(
            "projects/other/zones/z1/disks/d1",
            extend_partial_url("projects/other/zones/z1/disks/d1", "p1")
        );
    }

    /// 매칭 실패 시에도 모든 그룹 이름이 빈 값으로 채워지는지 검증한다.
    #[test]
    fn named_subexp_fills_missing_groups() {
        let parts = named_subexp(&MACHINE_TYPE_URL_RGX, "projects/p1/zones/z1/machineTypes/n1");
        assert_eq!("p1", parts["project"]);
        assert_eq!("z1", parts["zone"]);
        assert_eq!("n1", parts["machinetype"]);

        let missing = named_subexp(&MACHINE_TYPE_URL_RGX, "garbage");
        assert_eq!("", missing["project"]);
    }

    #[test]
    fn image_url_accepts_family_references() {
        let parts = named_subexp(&IMAGE_URL_RGX, "projects/p1/global/images/family/debian");
        assert_eq!("debian", parts["family"]);
        assert_eq!("", parts["image"]);
    }

    #[test]
    fn check_name_follows_rfc1035() {
        assert!(check_name("vm-1"));
        assert!(!check_name("Vm1"));
        assert!(!check_name("1vm"));
        assert!(!check_name("vm-"));
        assert!(!check_name(&"a".repeat(64)));
    }

    #[test]
    fn join_path_skips_empty_segments() {
        assert_eq!("a/b/c", join_path(&["a/", "", "/b", "c"]));
    }
}
