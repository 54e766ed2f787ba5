/// Weather variable registry.
///
/// Maps the variable ids used by event definitions to the dataset variables
/// they are read from and to the conversion between storage units (what the
/// forecast grid holds) and display units (what API consumers see).
///
/// Derived variables are computed from more than one dataset variable; wind
/// speed is the magnitude of the `10u`/`10v` components.

// ---------------------------------------------------------------------------
// Unit conversions
// ---------------------------------------------------------------------------

const KELVIN_OFFSET: f64 = 273.15;
const MS_TO_KMH: f64 = 3.6;
const KG_M2_S_TO_MM_H: f64 = 3600.0;

/// Linear conversion between a storage unit and a display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitConversion {
    Identity,
    KelvinToCelsius,
    MetersPerSecondToKilometersPerHour,
    /// kg m⁻² s⁻¹ precipitation rate to mm/h.
    FluxToMillimetersPerHour,
}

impl UnitConversion {
    pub fn to_display(&self, value: f64) -> f64 {
        match self {
            UnitConversion::Identity => value,
            UnitConversion::KelvinToCelsius => value - KELVIN_OFFSET,
            UnitConversion::MetersPerSecondToKilometersPerHour => value * MS_TO_KMH,
            UnitConversion::FluxToMillimetersPerHour => value * KG_M2_S_TO_MM_H,
        }
    }

    pub fn to_storage(&self, value: f64) -> f64 {
        match self {
            UnitConversion::Identity => value,
            UnitConversion::KelvinToCelsius => value + KELVIN_OFFSET,
            UnitConversion::MetersPerSecondToKilometersPerHour => value / MS_TO_KMH,
            UnitConversion::FluxToMillimetersPerHour => value / KG_M2_S_TO_MM_H,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Metadata for one weather variable.
#[derive(Debug)]
pub struct Variable {
    /// Id used by event definitions, e.g. `"2t"`.
    pub id: &'static str,
    pub label: &'static str,
    /// Dataset variables this one is read from. More than one means derived.
    pub source_variables: &'static [&'static str],
    /// Other names the same quantity goes by in different datasets.
    pub aliases: &'static [&'static str],
    pub storage_unit: &'static str,
    pub display_unit: &'static str,
    pub conversion: UnitConversion,
}

impl Variable {
    pub fn is_derived(&self) -> bool {
        self.source_variables.len() > 1
    }
}

pub static VARIABLE_REGISTRY: &[Variable] = &[
    Variable {
        id: "2t",
        label: "Temperature",
        source_variables: &["2t"],
        aliases: &["t2m", "2m_temperature"],
        storage_unit: "K",
        display_unit: "°C",
        conversion: UnitConversion::KelvinToCelsius,
    },
    Variable {
        id: "wind_speed",
        label: "Wind Speed",
        source_variables: &["10u", "10v"],
        aliases: &[],
        storage_unit: "m/s",
        display_unit: "km/h",
        conversion: UnitConversion::MetersPerSecondToKilometersPerHour,
    },
    Variable {
        id: "tprate",
        label: "Precipitation Rate",
        source_variables: &["tprate"],
        aliases: &[],
        storage_unit: "kg m-2 s-1",
        display_unit: "mm/h",
        conversion: UnitConversion::FluxToMillimetersPerHour,
    },
];

/// Looks up a variable by id or alias.
pub fn find_variable(id: &str) -> Option<&'static Variable> {
    VARIABLE_REGISTRY
        .iter()
        .find(|v| v.id == id || v.aliases.contains(&id))
}

/// Storage → display conversion for `id`; identity for unregistered ids.
pub fn conversion_for(id: &str) -> UnitConversion {
    find_variable(id)
        .map(|v| v.conversion)
        .unwrap_or(UnitConversion::Identity)
}
