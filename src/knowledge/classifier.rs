//! 계약서 유형 분류
//!
//! 20개 계약 유형마다 특징 용어 약 20개를 두고, 문서에 몇 개가 등장하는지 셉니다.
//! 가장 많이 일치한 유형이 선택되며, 동점이면 표 순서상 앞선 유형이 이깁니다.
//!
//! 용어 빈도에 기댄 추정일 뿐이며 법적 판단이 아닙니다.

use serde::{Deserialize, Serialize};

// ============================================================================
// Contract Type Table
// ============================================================================

/// 계약 유형 정의
#[derive(Debug)]
pub struct ContractType {
    pub name: &'static str,
    pub description: &'static str,
    pub terms: &'static [&'static str],
}

/// 계약 유형 표 (순서가 동점 처리 기준)
pub static CONTRACT_TYPES: &[ContractType] = &[
    ContractType {
        name: "근로계약서",
        description: "고용주와 근로자 간의 근로관계를 정하는 계약서",
        terms: &[
            "근로시간", "임금", "퇴직금", "연차휴가", "수습기간", "근로기준법", "계약기간",
            "해고", "업무내용", "복무규정", "연장근로", "야간근로", "휴게시간", "직무기술서",
            "취업규칙", "복리후생", "직급체계", "경력직", "정규직", "직장 내 괴롭힘 방지",
        ],
    },
    ContractType {
        name: "용역계약서",
        description: "특정 서비스나 업무의 제공에 관한 계약서",
        terms: &[
            "용역제공", "계약기간", "용역대금", "완료기준", "인도조건", "계약해지", "용역내용",
            "추가비용", "품질기준", "납품일정", "계약변경", "검수기준", "하자담보", "보고의무",
            "용역책임", "기밀유지", "지적재산권", "계약이행", "손해배상", "준거법",
        ],
    },
    ContractType {
        name: "매매계약서",
        description: "물품이나 재산의 매매에 관한 계약서",
        terms: &[
            "매도인", "매수인", "물품명세", "인도조건", "대금지급일", "하자보증", "소유권 이전",
            "계약금", "잔금", "위약금", "거래조건", "납품검수", "수령증", "반품정책", "사양서",
            "물품대금청구", "물류비용", "수출입신고", "무역조건", "국제운송", "세금계산서",
        ],
    },
    ContractType {
        name: "임대차계약서",
        description: "부동산이나 물건의 임대차에 관한 계약서",
        terms: &[
            "임대인", "임차인", "보증금", "임대료", "임대차 기간", "계약갱신", "관리비",
            "원상복구", "중도해지", "연체료", "손해배상", "전대금지", "권리금", "임대목적물",
            "사용승낙", "재계약", "사용제한", "유지보수", "일시불", "부동산등기", "시설물",
        ],
    },
    ContractType {
        name: "비밀유지계약서",
        description: "기밀정보의 보호와 관리에 관한 계약서",
        terms: &[
            "기밀정보", "수신자", "제공자", "비공개", "유효기간", "제3자 공개금지", "자료반환",
            "위반책임", "영업비밀", "정보보호", "손해배상", "독립개발", "반환의무", "사전동의",
            "정보사용목적", "비공개정보", "공개범위", "보안등급", "모니터링", "정보통제",
            "유출방지",
        ],
    },
    ContractType {
        name: "공급계약서",
        description: "지속적인 물품이나 서비스 공급에 관한 계약서",
        terms: &[
            "공급업체", "납품기한", "품질관리", "공급조건", "납품검수", "단가협상", "재고관리",
            "로트번호", "공급능력", "품질보증", "결함처리", "납기일정", "공급중단", "대체공급",
            "품질인증", "제품사양", "포장기준", "운송책임", "수량조정", "가격조정",
        ],
    },
    ContractType {
        name: "프랜차이즈 계약서",
        description: "가맹사업에 관한 권리와 의무를 정하는 계약서",
        terms: &[
            "가맹본부", "가맹점", "가맹금", "로열티", "영업지역", "상표사용권", "영업노하우",
            "광고분담금", "매뉴얼", "교육훈련", "점포운영", "판매목표", "계약해지", "경업금지",
            "재계약", "점포이전", "인테리어", "원재료 구매", "영업감독", "브랜드 관리",
        ],
    },
    ContractType {
        name: "MOU",
        description: "상호 협력과 양해에 관한 각서",
        terms: &[
            "양해각서", "협력사항", "역할분담", "협력기간", "비밀유지", "지적재산권", "공동연구",
            "정보공유", "의사결정", "분쟁해결", "계약해지", "후속협약", "협력범위", "상호협력",
            "공동개발", "협의사항", "업무협조", "협력체계", "연락창구", "평가방법",
        ],
    },
    ContractType {
        name: "주식양도계약서",
        description: "주식의 양도와 매매에 관한 계약서",
        terms: &[
            "양도인", "양수인", "주식수", "양도가격", "주식양도", "주주권리", "대금지급",
            "양도조건", "주주총회", "이사회", "배당권", "신주인수권", "경영권", "주식평가",
            "실사완료", "담보제공", "표명보장", "손해배상", "양도제한", "우선매수권",
        ],
    },
    ContractType {
        name: "라이선스 계약서",
        description: "지적재산권의 사용허가에 관한 계약서",
        terms: &[
            "라이선서", "라이선시", "특허권", "실시료", "독점", "비독점", "실시범위", "기술지원",
            "개량발명", "라이선스 기간", "최소실시료", "기술이전", "노하우", "개발성과",
            "사용제한", "기술정보", "실시보고", "특허출원", "지적재산권", "계약해지",
        ],
    },
    ContractType {
        name: "합작투자계약서",
        description: "공동투자와 사업운영에 관한 계약서",
        terms: &[
            "합작당사자", "출자비율", "경영권", "이익배분", "손실분담", "이사회", "경영진",
            "재무관리", "의사결정", "합작회사", "청산절차", "계약해지", "출자의무", "자본금",
            "기술기여", "운영관리", "감사권", "정보공개", "경쟁제한", "분쟁해결",
        ],
    },
    ContractType {
        name: "위임계약서",
        description: "특정 업무의 위임에 관한 계약서",
        terms: &[
            "위임자", "수임자", "위임사무", "보수", "위임기간", "선관주의의무", "보고의무",
            "계산서 제출", "비용정산", "대리권", "복위임", "위임해지", "손해배상", "기밀유지",
            "이해상충", "수임료", "경비부담", "업무범위", "권한범위", "책임한계",
        ],
    },
    ContractType {
        name: "기술이전계약서",
        description: "기술과 노하우의 이전에 관한 계약서",
        terms: &[
            "기술제공자", "기술도입자", "기술료", "기술범위", "기술문서", "기술지도", "개량기술",
            "특허출원", "노하우", "기술평가", "기술검증", "실시권", "독점권", "기술지원",
            "교육훈련", "기술개발", "성과배분", "기술보증", "계약해지", "경업금지",
        ],
    },
    ContractType {
        name: "하도급계약서",
        description: "건설이나 제조업의 하도급에 관한 계약서",
        terms: &[
            "원도급자", "하도급자", "하도급대금", "공사기간", "시공범위", "품질기준", "안전관리",
            "진도관리", "검사기준", "기성고", "하자보수", "계약변경", "공사중단", "하도급법",
            "지급보증", "이행보증", "설계변경", "공기연장", "손해배상", "보험가입",
        ],
    },
    ContractType {
        name: "광고대행계약서",
        description: "광고업무의 대행에 관한 계약서",
        terms: &[
            "광고주", "광고대행사", "광고비", "광고기간", "매체선정", "광고효과", "크리에이티브",
            "매체수수료", "광고승인", "광고결과", "예산관리", "광고전략", "타겟팅", "광고평가",
            "저작권", "초상권", "광고윤리", "계약해지", "손해배상", "기밀유지",
        ],
    },
    ContractType {
        name: "컨설팅계약서",
        description: "전문적인 조언과 컨설팅에 관한 계약서",
        terms: &[
            "컨설턴트", "클라이언트", "컨설팅료", "컨설팅 기간", "컨설팅 범위", "성과물",
            "보고서", "컨설팅 방법", "전문성", "기밀유지", "이해상충", "책임한계", "성과보장",
            "추가비용", "지적재산권", "경쟁제한", "계약해지", "손해배상", "분쟁해결", "준거법",
        ],
    },
    ContractType {
        name: "출판계약서",
        description: "저작물의 출간과 배포에 관한 계약서",
        terms: &[
            "저작자", "출판사", "인세", "출간일", "판권", "저작권", "편집권", "배포권", "번역권",
            "2차 저작물", "최소출간부수", "절판기준", "재출간", "광고홍보", "마케팅",
            "저작인격권", "수정권", "검열금지", "계약해지", "손해배상",
        ],
    },
    ContractType {
        name: "건설공사계약서",
        description: "건설공사의 시행에 관한 계약서",
        terms: &[
            "발주자", "수급인", "공사대금", "공사기간", "설계도서", "시방서", "품질관리",
            "안전관리", "준공검사", "하자담보", "기성고", "선급금", "공사변경", "공기연장",
            "계약해지", "손해배상", "이행보증", "하자보수", "보험가입", "하도급",
        ],
    },
    ContractType {
        name: "임의규약계약서",
        description: "당사자 간의 특별한 약정에 관한 계약서",
        terms: &[
            "당사자", "합의사항", "이행조건", "계약기간", "권리의무", "특약사항", "면책조항",
            "불가항력", "계약변경", "계약해지", "분쟁해결", "준거법", "관할법원", "통지의무",
            "승계금지", "계약의 효력", "해석기준", "우선순위", "부속합의", "완전합의",
        ],
    },
    ContractType {
        name: "투자계약서",
        description: "투자와 지분참여에 관한 계약서",
        terms: &[
            "투자자", "피투자회사", "투자금액", "주식인수", "기업가치", "우선주", "전환권",
            "희석방지", "투자조건", "경영참여", "정보제공", "승인사항", "우선청산권",
            "동반매도권", "우선매수권", "경업금지", "키맨조항", "투자회수", "IPO", "M&A",
        ],
    },
];

/// 이름으로 계약 유형 조회
pub fn contract_type(name: &str) -> Option<&'static ContractType> {
    CONTRACT_TYPES.iter().find(|t| t.name == name)
}

// ============================================================================
// Classification
// ============================================================================

/// 유형별 일치 점수
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeScore {
    pub contract_type: String,
    /// 일치한 용어 수
    pub score: usize,
    /// 일치 용어 수 / 유형 용어 수 × 100 (소수 첫째 자리 반올림)
    pub percentage: f32,
    pub matched_terms: Vec<String>,
}

/// 분류 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    Detected {
        best: TypeScore,
        /// 점수 내림차순 (일치가 하나라도 있는 유형만)
        all_scores: Vec<TypeScore>,
    },
    /// 어떤 유형의 용어도 등장하지 않음
    Unknown,
}

impl Classification {
    pub fn contract_type(&self) -> Option<&str> {
        match self {
            Classification::Detected { best, .. } => Some(&best.contract_type),
            Classification::Unknown => None,
        }
    }

    pub fn best(&self) -> Option<&TypeScore> {
        match self {
            Classification::Detected { best, .. } => Some(best),
            Classification::Unknown => None,
        }
    }

    pub fn matched_terms(&self) -> &[String] {
        self.best().map(|b| b.matched_terms.as_slice()).unwrap_or(&[])
    }

    /// 감지된 유형의 전체 용어 목록
    pub fn type_terms(&self) -> &'static [&'static str] {
        self.contract_type()
            .and_then(contract_type)
            .map(|t| t.terms)
            .unwrap_or(&[])
    }

    pub fn description(&self) -> Option<&'static str> {
        self.contract_type()
            .and_then(contract_type)
            .map(|t| t.description)
    }
}

/// 문서 텍스트로 계약 유형 추정
pub fn classify(text: &str) -> Classification {
    let mut scores: Vec<TypeScore> = CONTRACT_TYPES
        .iter()
        .filter_map(|ct| {
            let matched: Vec<String> = ct
                .terms
                .iter()
                .filter(|term| text.contains(*term))
                .map(|term| term.to_string())
                .collect();

            if matched.is_empty() {
                return None;
            }

            let percentage = matched.len() as f32 / ct.terms.len() as f32 * 100.0;
            Some(TypeScore {
                contract_type: ct.name.to_string(),
                score: matched.len(),
                percentage: (percentage * 10.0).round() / 10.0,
                matched_terms: matched,
            })
        })
        .collect();

    // 안정 정렬: 동점이면 표 순서 유지
    scores.sort_by(|a, b| b.score.cmp(&a.score));

    match scores.first().cloned() {
        Some(best) => {
            tracing::info!(
                "Detected contract type: {} ({}%, {} terms)",
                best.contract_type,
                best.percentage,
                best.score
            );
            Classification::Detected {
                best,
                all_scores: scores,
            }
        }
        None => {
            tracing::info!("Contract type not detected");
            Classification::Unknown
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYMENT: &str = "근로계약서\n제1조 (근로시간) 근로시간은 1일 8시간으로 한다.\n\
        제2조 (임금) 임금은 월 300만원이다.\n제3조 (연차휴가) 연차휴가는 근로기준법에 따른다.";

    #[test]
    fn test_table_shape() {
        assert_eq!(CONTRACT_TYPES.len(), 20);
        assert!(CONTRACT_TYPES.iter().all(|t| t.terms.len() >= 20));
    }

    #[test]
    fn test_detects_employment_contract() {
        let result = classify(EMPLOYMENT);

        assert_eq!(result.contract_type(), Some("근로계약서"));
        let best = result.best().unwrap();
        assert!(best.matched_terms.contains(&"근로시간".to_string()));
        assert_eq!(best.score, 4); // 근로시간, 임금, 연차휴가, 근로기준법
        assert_eq!(best.percentage, 20.0);
        assert_eq!(
            result.description(),
            Some("고용주와 근로자 간의 근로관계를 정하는 계약서")
        );
    }

    #[test]
    fn test_unknown_when_no_terms() {
        let result = classify("오늘은 맑고 화창한 하루입니다.");
        assert_eq!(result, Classification::Unknown);
        assert!(result.matched_terms().is_empty());
        assert!(result.type_terms().is_empty());
    }

    #[test]
    fn test_ties_go_to_first_table_entry() {
        // "손해배상"은 용역/임대차/비밀유지 등 여러 유형에 공통
        let result = classify("손해배상");
        assert_eq!(result.contract_type(), Some("용역계약서"));

        if let Classification::Detected { all_scores, .. } = &result {
            assert!(all_scores.len() > 1);
            assert!(all_scores.iter().all(|s| s.score == 1));
        }
    }

    #[test]
    fn test_deterministic() {
        let a = classify(EMPLOYMENT);
        let b = classify(EMPLOYMENT);
        assert_eq!(a, b);
    }

    #[test]
    fn test_percentage_rounding() {
        // 매매계약서는 21개 용어: 1/21 = 4.76..% -> 4.8
        let result = classify("매도인");
        assert_eq!(result.contract_type(), Some("매매계약서"));
        assert_eq!(result.best().unwrap().percentage, 4.8);
    }

    #[test]
    fn test_serde_roundtrip_tag() {
        let json = serde_json::to_value(classify("보증금")).unwrap();
        assert_eq!(json["status"], "detected");
    }
}
