use crate::modbus::{FunctionCode, WordOrder};

// SPM-1 input register addresses (32-bit floats, two registers each)
pub const AC_V_A: u16 = 0x1000;
pub const AC_V_B: u16 = 0x1002;
pub const AC_V_C: u16 = 0x1004;
pub const AC_I_A: u16 = 0x1010;
pub const AC_I_B: u16 = 0x1012;
pub const AC_I_C: u16 = 0x1014;
pub const AC_FREQ: u16 = 0x1018;
pub const AC_KW_P_TOTAL: u16 = 0x1020;
pub const AC_PF: u16 = 0x1038;
pub const AC_KWH: u16 = 0x103A;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSpec {
    pub name: &'static str,
    pub address: u16,
    pub function: FunctionCode,
    /// Decimal places kept in the published value.
    pub round: u32,
    pub word_order: WordOrder,
}

impl RegisterSpec {
    pub const fn input(name: &'static str, address: u16, round: u32) -> Self {
        Self {
            name,
            address,
            function: FunctionCode::ReadInputRegisters,
            round,
            word_order: WordOrder::LittleSwap,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterModule {
    pub name: &'static str,
    pub registers: Vec<RegisterSpec>,
}

/// Ordered modules of named registers. Reads and payload keys follow this order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterCatalogue {
    pub modules: Vec<RegisterModule>,
}

impl RegisterCatalogue {
    pub fn new(modules: Vec<RegisterModule>) -> Self {
        Self { modules }
    }

    /// Voltage (M9), current and frequency (M10), power and energy (M11).
    pub fn spm1() -> Self {
        Self::new(vec![
            RegisterModule {
                name: "M9",
                registers: vec![
                    RegisterSpec::input("ac_v_a", AC_V_A, 1),
                    RegisterSpec::input("ac_v_b", AC_V_B, 1),
                    RegisterSpec::input("ac_v_c", AC_V_C, 1),
                ],
            },
            RegisterModule {
                name: "M10",
                registers: vec![
                    RegisterSpec::input("ac_i_a", AC_I_A, 3),
                    RegisterSpec::input("ac_i_b", AC_I_B, 3),
                    RegisterSpec::input("ac_i_c", AC_I_C, 3),
                    RegisterSpec::input("ac_freq", AC_FREQ, 2),
                ],
            },
            RegisterModule {
                name: "M11",
                registers: vec![
                    RegisterSpec::input("ac_kw_p_total", AC_KW_P_TOTAL, 3),
                    RegisterSpec::input("ac_pf", AC_PF, 3),
                    RegisterSpec::input("ac_kwh", AC_KWH, 3),
                ],
            },
        ])
    }

    /// Every register paired with its module name, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &RegisterSpec)> {
        self.modules
            .iter()
            .flat_map(|m| m.registers.iter().map(move |r| (m.name, r)))
    }

    pub fn register_count(&self) -> usize {
        self.modules.iter().map(|m| m.registers.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spm1_declaration_order() {
        let catalogue = RegisterCatalogue::spm1();
        let names: Vec<_> = catalogue.iter().map(|(_, r)| r.name).collect();
        assert_eq!(
            names,
            vec![
                "ac_v_a", "ac_v_b", "ac_v_c", "ac_i_a", "ac_i_b", "ac_i_c", "ac_freq",
                "ac_kw_p_total", "ac_pf", "ac_kwh",
            ]
        );
        assert_eq!(catalogue.register_count(), 10);
    }

    #[test]
    fn test_spm1_uses_input_registers_word_swapped() {
        let catalogue = RegisterCatalogue::spm1();
        assert!(catalogue.iter().all(|(_, r)| {
            r.function == FunctionCode::ReadInputRegisters && r.word_order == WordOrder::LittleSwap
        }));
        let (module, freq) = catalogue.iter().find(|(_, r)| r.name == "ac_freq").unwrap();
        assert_eq!(module, "M10");
        assert_eq!(freq.address, 0x1018);
        assert_eq!(freq.round, 2);
    }
}
