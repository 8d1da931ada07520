//! イメージ参照のユーティリティ

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app:dev` -> `("localhost:5000/app", "dev")`
pub fn split_image_tag(image: &str) -> (String, String) {
    // digest 指定はタグとして扱わない
    let without_digest = image.split('@').next().unwrap_or(image);

    if let Some(pos) = without_digest.rfind(':') {
        let potential_tag = &without_digest[pos + 1..];
        let potential_image = &without_digest[..pos];

        // ポート番号（localhost:5000/app）とタグを区別する
        if !potential_tag.contains('/') {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (without_digest.to_string(), "latest".to_string())
}

/// イメージ参照のバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_reference(reference: &str) -> Result<(), String> {
    if reference.trim().is_empty() {
        return Err("イメージ参照が空です".to_string());
    }
    if reference.chars().any(char::is_whitespace) {
        return Err(format!("空白を含めることはできません: '{}'", reference));
    }

    let (repository, tag) = split_image_tag(reference);

    if repository.is_empty() || repository.ends_with('/') || repository.starts_with('/') {
        return Err(format!("リポジトリ名が不正です: '{}'", reference));
    }
    if repository.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(format!(
            "リポジトリ名に大文字は使用できません: '{}'",
            repository
        ));
    }

    if tag.is_empty() {
        return Err(format!("タグが空です: '{}'", reference));
    }
    if tag.len() > 128 {
        return Err(format!("タグが長すぎます（{}文字、最大128文字）", tag.len()));
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(format!("タグの先頭に '.' や '-' は使用できません: '{}'", tag));
    }
    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(format!("タグに無効な文字 '{}' が含まれています: '{}'", c, tag));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_tag_with_tag() {
        let (image, tag) = split_image_tag("ghcr.io/org/app:v1.0");
        assert_eq!(image, "ghcr.io/org/app");
        assert_eq!(tag, "v1.0");
    }

    #[test]
    fn test_split_image_tag_without_tag() {
        let (image, tag) = split_image_tag("ghcr.io/org/app");
        assert_eq!(image, "ghcr.io/org/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_split_image_tag_with_port() {
        let (image, tag) = split_image_tag("localhost:5000/app");
        assert_eq!(image, "localhost:5000/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_split_image_tag_with_port_and_tag() {
        let (image, tag) = split_image_tag("localhost:5000/app:dev");
        assert_eq!(image, "localhost:5000/app");
        assert_eq!(tag, "dev");
    }

    #[test]
    fn test_validate_artifact_registry_reference() {
        assert!(
            validate_reference("asia-northeast1-docker.pkg.dev/shop-prod/assistant/api:latest")
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_bad_tags() {
        assert!(validate_reference("").is_err());
        assert!(validate_reference("app:-dev").is_err());
        assert!(validate_reference("app:v1+build").is_err());
        assert!(validate_reference(&format!("app:{}", "a".repeat(129))).is_err());
        assert!(validate_reference("registry/:tag").is_err());
        assert!(validate_reference("Registry/App:tag").is_err());
        assert!(validate_reference("app name:tag").is_err());
    }
}
