pub mod content_class_utils;
pub mod encoding_utils;
pub mod html_rewrite_utils;
pub mod interceptor_utils;
pub mod manifest_rewrite_utils;
pub mod response_utils;
pub mod url_utils;
