/// Returns the basename of the image, if the image is a path string.
pub fn image_base_name(image: &str) -> &str {
    image.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
}

/// Compares two images by normalizing them to a basename representation.
///
/// Image paths like `/private/var/containers/<UUID>/App` contain components
/// that are unique to specific devices and installations, so only the final
/// segment is meaningful for identity.
pub fn is_image_equal(image1: &str, image2: &str) -> bool {
    image_base_name(image1) == image_base_name(image2)
}

/// Returns the identity of a frame: `basename(image):symbol`.
pub fn frame_identifier(image: &str, symbol: &str) -> String {
    format!("{}:{}", image_base_name(image), symbol)
}

/// Returns the stable key for a function, independent of its position in any
/// call tree.
///
/// The key is an MD5 hash over the image and symbol, rendered as lowercase
/// hex. Identical `(image, symbol)` pairs always produce the same key.
pub fn function_key(image: &str, symbol: &str) -> String {
    let mut bytes = Vec::with_capacity(image.len() + symbol.len());
    bytes.extend_from_slice(image.as_bytes());
    bytes.extend_from_slice(symbol.as_bytes());
    format!("{:x}", md5::compute(bytes))
}

/// Determines whether the image is part of the application binary (or a
/// binary embedded in the application) by checking its path.
///
/// iOS stores application code under the container paths below; system
/// libraries live elsewhere.
pub fn is_ios_application_image(image: &str) -> bool {
    image.starts_with("/private/var/containers")
        || image.starts_with("/var/containers")
        || image.contains("/Developer/Xcode/DerivedData")
        || image.contains("/data/Containers/Bundle/Application")
}

const ANDROID_PACKAGE_PREFIXES: &[&str] = &[
    "android.",
    "androidx.",
    "com.android.",
    "com.google.android.",
    "com.motorola.",
    "java.",
    "javax.",
    "kotlin.",
    "kotlinx.",
    "retrofit2.",
    "sun.",
];

/// Returns `true` if the package belongs to the Android system rather than
/// application code.
pub fn is_android_system_package(package: &str) -> bool {
    ANDROID_PACKAGE_PREFIXES
        .iter()
        .any(|prefix| package.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_base_name() {
        assert_eq!(image_base_name(""), "");
        assert_eq!(image_base_name("UIKit"), "UIKit");
        assert_eq!(
            image_base_name("/private/var/containers/deadbeef/App"),
            "App"
        );
        assert_eq!(image_base_name("/usr/lib/system/"), "system");
    }

    #[test]
    fn test_is_image_equal() {
        assert!(is_image_equal(
            "/private/var/containers/1/App",
            "/private/var/containers/2/App"
        ));
        assert!(!is_image_equal("/usr/lib/UIKit", "App"));
    }

    #[test]
    fn test_function_key_is_stable() {
        let a = function_key("UIKit", "layoutSubviews");
        let b = function_key("UIKit", "layoutSubviews");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, function_key("UIKit", "drawRect"));
    }

    #[test]
    fn test_android_system_packages() {
        assert!(is_android_system_package("androidx.compose.Runtime"));
        assert!(is_android_system_package("java.util.ArrayList"));
        assert!(!is_android_system_package("com.example.app.MainActivity"));
    }
}
