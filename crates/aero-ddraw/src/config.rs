/// Compatibility switches that change binding behavior for specific titles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompatOptions {
    /// Map every back buffer of a flip chain to swap-chain slot 0.
    pub force_single_back_buffer: bool,
    /// Read render-target contents back into CPU memory before the client locks a surface.
    pub proxied_presentation: bool,
    /// Place managed textures in local memory when running on a T&L HAL device.
    pub managed_textures_local_on_tnl: bool,
}

impl CompatOptions {
    pub const FORCE_SINGLE_BACK_BUFFER_ENV: &'static str = "AERO_DDRAW_FORCE_SINGLE_BACK_BUFFER";
    pub const PROXIED_PRESENTATION_ENV: &'static str = "AERO_DDRAW_PROXIED_PRESENTATION";
    pub const MANAGED_LOCAL_ON_TNL_ENV: &'static str = "AERO_DDRAW_MANAGED_LOCAL_ON_TNL";

    /// Defaults with any option whose environment variable is truthy switched on.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.force_single_back_buffer |= env_var_truthy(Self::FORCE_SINGLE_BACK_BUFFER_ENV);
        self.proxied_presentation |= env_var_truthy(Self::PROXIED_PRESENTATION_ENV);
        self.managed_textures_local_on_tnl |= env_var_truthy(Self::MANAGED_LOCAL_ON_TNL_ENV);
        self
    }
}

fn env_var_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };
    is_truthy(&raw)
}

fn is_truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}
