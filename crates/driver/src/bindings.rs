use ethers::prelude::abigen;

// Generates the bindings for the `Colosseum` contract, which stores challenges and enforces turns.
abigen!(
    Colosseum,
    r"[
        struct Challenge { uint8 turn; uint64 timeoutAt; address asserter; address challenger; bytes32[] segments; uint256 segSize; uint256 segStart; bytes32 l1Head; }
        struct ZkVmProof { bytes32 vkey; bytes publicValues; bytes proof; }
        struct ZkEvmProof { bytes publicInputProof; uint256[] proof; uint256[] pair; }
        event ChallengeCreated(uint256 indexed outputIndex, address indexed asserter, address indexed challenger, uint256 timestamp)
        event ReadyToProve(uint256 indexed outputIndex, address indexed challenger)
        function getStatus(uint256 _outputIndex, address _challenger) external view returns (uint8)
        function getChallenge(uint256 _outputIndex, address _challenger) external view returns (Challenge memory)
        function segmentsLengths(uint256 _index) external view returns (uint256)
        function isInCreationPeriod(uint256 _outputIndex) external view returns (bool)
        function CREATION_PERIOD_SECONDS() external view returns (uint256)
        function createChallenge(uint256 _outputIndex, bytes32 _l1BlockHash, uint256 _l1BlockNumber, bytes32[] calldata _segments) external
        function bisect(uint256 _outputIndex, address _challenger, uint256 _pos, bytes32[] calldata _segments) external
        function proveFaultWithZkVm(uint256 _outputIndex, uint256 _pos, ZkVmProof calldata _zkVmProof) external
        function proveFaultWithZkEvm(uint256 _outputIndex, uint256 _pos, ZkEvmProof calldata _zkEvmProof) external
        function challengerTimeout(uint256 _outputIndex, address _challenger) external
        function cancelChallenge(uint256 _outputIndex) external
    ]"
);

// Generates the bindings for the `L2OutputOracle` contract.
abigen!(
    L2OutputOracle,
    r"[
        struct CheckpointOutput { bytes32 outputRoot; address submitter; uint128 timestamp; uint128 l2BlockNumber; }
        function getL2Output(uint256 _l2OutputIndex) external view returns (CheckpointOutput memory)
        function getL2OutputIndexAfter(uint256 _l2BlockNumber) external view returns (uint256)
        function nextOutputIndex() external view returns (uint256)
        function isFinalized(uint256 _outputIndex) external view returns (bool)
        function SUBMISSION_INTERVAL() external view returns (uint256)
        function L2_BLOCK_TIME() external view returns (uint256)
        function FINALIZATION_PERIOD_SECONDS() external view returns (uint256)
        function nextBlockNumber() external view returns (uint256)
        function submitL2Output(bytes32 _outputRoot, uint256 _l2BlockNumber, bytes32 _l1BlockHash, uint256 _l1BlockNumber) external
    ]"
);

// Generates the bindings for the `ValidatorPool` contract, which holds validator bonds.
abigen!(
    ValidatorPool,
    r"[
        function balanceOf(address _addr) external view returns (uint256)
        function REQUIRED_BOND_AMOUNT() external view returns (uint256)
        function nextValidator() external view returns (address)
    ]"
);

// Generates the bindings for the `ValidatorManager` contract.
abigen!(
    ValidatorManager,
    r"[
        function inJail(address _validator) external view returns (bool)
    ]"
);

// Generates the bindings for the `SecurityCouncil` multisig.
abigen!(
    SecurityCouncil,
    r"[
        event ValidationRequested(uint256 indexed transactionId, bytes32 outputRoot, uint256 l2BlockNumber)
        event DeletionRequested(uint256 indexed transactionId, uint256 indexed outputIndex)
        function isConfirmed(uint256 _transactionId) external view returns (bool)
        function transactions(uint256 _transactionId) external view returns (address destination, uint256 value, bytes data, bool executed)
        function confirmTransaction(uint256 _transactionId) external
        function requestDeletion(uint256 _outputIndex, bool _force) external
    ]"
);
