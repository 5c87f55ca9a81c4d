// client-side second line of defence: urls the page builds at runtime never show up in the
// markup, so the injected script routes them through the proxy right before they leave the page.
// it is plain string generation, nothing here keeps state between requests
use crate::server::utils::url_utils::ProxyBase;

/// marker attribute, used to keep a second rewrite pass from injecting the script twice
pub const INTERCEPTOR_MARKER: &str = "data-embed-proxy";

const TEMPLATE: &str = r#"<script __MARKER__>
(function () {
  var PREFIX = __PREFIX__;
  var REFERER = __REFERER__;

  function proxied(url) {
    if (typeof url !== 'string' || !/^(https?:)?\/\//i.test(url)) return url;
    if (url.indexOf(PREFIX) === 0) return url;
    var absolute = url.indexOf('//') === 0 ? location.protocol + url : url;
    var out = PREFIX + encodeURIComponent(absolute);
    if (REFERER) out += '&referer=' + encodeURIComponent(REFERER);
    return out;
  }

  if (window.fetch) {
    var originalFetch = window.fetch;
    window.fetch = function (input, init) {
      if (typeof input === 'string') {
        input = proxied(input);
      } else if (input && input.url && typeof Request !== 'undefined' && input instanceof Request) {
        var rewritten = proxied(input.url);
        if (rewritten !== input.url) input = new Request(rewritten, input);
      }
      return originalFetch.call(this, input, init);
    };
  }

  if (window.XMLHttpRequest) {
    var originalOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function (method, url) {
      var args = Array.prototype.slice.call(arguments);
      args[1] = proxied(typeof url === 'string' ? url : String(url));
      return originalOpen.apply(this, args);
    };
  }

  [window.HTMLScriptElement, window.HTMLImageElement, window.HTMLMediaElement,
   window.HTMLSourceElement, window.HTMLIFrameElement].forEach(function (type) {
    if (!type) return;
    var descriptor = Object.getOwnPropertyDescriptor(type.prototype, 'src');
    if (!descriptor || !descriptor.set) return;
    Object.defineProperty(type.prototype, 'src', {
      configurable: true,
      enumerable: descriptor.enumerable,
      get: descriptor.get,
      set: function (value) { descriptor.set.call(this, proxied(value)); }
    });
  });

  var originalSetAttribute = Element.prototype.setAttribute;
  Element.prototype.setAttribute = function (name, value) {
    if (typeof name === 'string' && name.toLowerCase() === 'src') value = proxied(value);
    return originalSetAttribute.call(this, name, value);
  };
})();
</script>"#;

// json strings are valid js literals, `</` still has to be broken up to stay inside the tag
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace("</", "<\\/")
}

/// Script tag for a page served through `proxy`. `referer` is carried on every runtime url so
/// the follow-up fetches pick the same header profile as the page itself.
pub fn interceptor_script(proxy: &ProxyBase, referer: Option<&str>) -> String {
    TEMPLATE
        .replace("__MARKER__", INTERCEPTOR_MARKER)
        .replace("__PREFIX__", &js_string(&proxy.prefix()))
        .replace("__REFERER__", &js_string(referer.unwrap_or("")))
}
