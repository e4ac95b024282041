//! Randomized, internally consistent browser identities.
//!
//! Each new page gets a fingerprint drawn from small sets of common desktop
//! values. Consistency matters more than variety: the platform must match the
//! user agent, the languages must match the Accept-Language header, and the
//! screen metrics must match the viewport, or the combination itself becomes
//! a fingerprint.

use rand::prelude::IndexedRandom;

const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1536, 864),
    (1440, 900),
    (1366, 768),
    (2560, 1440),
];

/// Chrome user agents; windows/mac pairs with the platform table below.
const WINDOWS_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const MAC_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
];

/// (accept_language, primary language, navigator.languages)
const LOCALES: &[(&str, &str, &[&str])] = &[
    ("en-US,en;q=0.9", "en-US", &["en-US", "en"]),
    ("de-DE,de;q=0.9,en;q=0.8", "de-DE", &["de-DE", "de", "en"]),
    ("en-GB,en;q=0.9", "en-GB", &["en-GB", "en"]),
];

const HARDWARE_CONCURRENCY: &[u32] = &[4, 8, 12, 16];

const WEBGL_IDENTITIES: &[(&str, &str)] = &[
    ("Intel Inc.", "Intel(R) UHD Graphics 630"),
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
    (
        "Google Inc. (NVIDIA)",
        "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 Direct3D11 vs_5_0 ps_5_0)",
    ),
];

/// One internally consistent identity for a browser page.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
    pub language: String,
    pub languages: Vec<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub hardware_concurrency: u32,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
}

impl Fingerprint {
    /// Draw a fresh identity. Never fails; falls back to the first entry of
    /// each table if the RNG misbehaves.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::rng();

        let windows = rand::random::<bool>();
        let (user_agent, platform) = if windows {
            (
                *WINDOWS_USER_AGENTS.choose(&mut rng).unwrap_or(&WINDOWS_USER_AGENTS[0]),
                "Win32",
            )
        } else {
            (
                *MAC_USER_AGENTS.choose(&mut rng).unwrap_or(&MAC_USER_AGENTS[0]),
                "MacIntel",
            )
        };

        let (width, height) = *VIEWPORTS.choose(&mut rng).unwrap_or(&VIEWPORTS[0]);
        let (accept_language, language, languages) =
            *LOCALES.choose(&mut rng).unwrap_or(&LOCALES[0]);
        let (webgl_vendor, webgl_renderer) = *WEBGL_IDENTITIES
            .choose(&mut rng)
            .unwrap_or(&WEBGL_IDENTITIES[0]);

        Self {
            user_agent: user_agent.to_string(),
            accept_language: accept_language.to_string(),
            platform: platform.to_string(),
            language: language.to_string(),
            languages: languages.iter().map(|l| (*l).to_string()).collect(),
            viewport_width: width,
            viewport_height: height,
            hardware_concurrency: *HARDWARE_CONCURRENCY
                .choose(&mut rng)
                .unwrap_or(&HARDWARE_CONCURRENCY[0]),
            webgl_vendor: webgl_vendor.to_string(),
            webgl_renderer: webgl_renderer.to_string(),
        }
    }

    /// Script injected before any document script runs. Overrides the
    /// introspectable navigator/screen/WebGL surface so the automated browser
    /// reads like an ordinary desktop Chrome.
    #[must_use]
    pub(crate) fn override_script(&self) -> String {
        let languages_json =
            serde_json::to_string(&self.languages).unwrap_or_else(|_| "[]".to_string());

        format!(
            r#"
            Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
            Object.defineProperty(navigator, 'platform', {{ get: () => '{platform}' }});
            Object.defineProperty(navigator, 'language', {{ get: () => '{language}' }});
            Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
            Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {cores} }});

            Object.defineProperty(screen, 'width', {{ get: () => {width} }});
            Object.defineProperty(screen, 'height', {{ get: () => {height} }});
            Object.defineProperty(screen, 'availWidth', {{ get: () => {width} }});
            Object.defineProperty(screen, 'availHeight', {{ get: () => {height} }});

            const mockPlugins = [
                {{ name: 'Chrome PDF Plugin', description: 'Portable Document Format', filename: 'internal-pdf-viewer' }},
                {{ name: 'Chrome PDF Viewer', description: '', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' }},
                {{ name: 'Native Client', description: '', filename: 'internal-nacl-plugin' }}
            ];
            Object.defineProperty(navigator, 'plugins', {{
                get: () => {{
                    const plugins = {{}};
                    mockPlugins.forEach((plugin, i) => {{ plugins[i] = plugin; plugins[plugin.name] = plugin; }});
                    Object.defineProperty(plugins, 'length', {{ value: mockPlugins.length }});
                    return plugins;
                }}
            }});

            if (navigator.permissions && navigator.permissions.query) {{
                const originalQuery = navigator.permissions.query.bind(navigator.permissions);
                navigator.permissions.query = (parameters) =>
                    parameters && parameters.name === 'notifications'
                        ? Promise.resolve({{ state: Notification.permission }})
                        : originalQuery(parameters);
            }}

            if (!window.chrome) {{ window.chrome = {{}}; }}
            if (!window.chrome.runtime) {{
                window.chrome.runtime = {{
                    connect: () => ({{
                        onMessage: {{ addListener: () => {{}}, removeListener: () => {{}} }},
                        postMessage: () => {{}}
                    }})
                }};
            }}

            if (window.WebGLRenderingContext) {{
                const getParameter = WebGLRenderingContext.prototype.getParameter;
                WebGLRenderingContext.prototype.getParameter = new Proxy(getParameter, {{
                    apply: (target, ctx, args) => {{
                        const param = (args && args[0]) || null;
                        if (param === 37445) {{ return '{webgl_vendor}'; }}
                        if (param === 37446) {{ return '{webgl_renderer}'; }}
                        return Reflect.apply(target, ctx, args);
                    }}
                }});
            }}
            "#,
            platform = self.platform,
            language = self.language,
            languages = languages_json,
            cores = self.hardware_concurrency,
            width = self.viewport_width,
            height = self.viewport_height,
            webgl_vendor = self.webgl_vendor,
            webgl_renderer = self.webgl_renderer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_internally_consistent() {
        for _ in 0..32 {
            let fp = Fingerprint::random();
            if fp.platform == "Win32" {
                assert!(fp.user_agent.contains("Windows NT"));
            } else {
                assert!(fp.user_agent.contains("Macintosh"));
            }
            assert!(fp.languages.contains(&fp.language));
            assert!(fp.accept_language.starts_with(&fp.language));
            assert!(fp.viewport_width >= 1366);
        }
    }

    #[test]
    fn override_script_embeds_identity() {
        let fp = Fingerprint::random();
        let script = fp.override_script();
        assert!(script.contains(&fp.platform));
        assert!(script.contains(&fp.webgl_vendor));
        assert!(script.contains(&fp.viewport_width.to_string()));
    }
}
